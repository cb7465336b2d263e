//! Ordered transform stages spliced between the two ends of a pipe.

use std::collections::VecDeque;

/// A transform stage. Yielding `None` drops the value and cancels the pipe.
pub(super) type Transform<T> = Box<dyn FnMut(T) -> Option<T>>;

/// Hook fired exactly once when the pipe half-closes cleanly.
pub(super) type HalfCloseHook = Box<dyn FnOnce()>;

struct Stage<T> {
    transform: Transform<T>,
    on_half_close: Option<HalfCloseHook>,
}

/// Ordered list of interceptor stages.
///
/// Senders prepend and receivers append, so a value runs through the
/// sender-registered stages first (most recently prepended first), then the
/// receiver-registered stages in append order. Stages registered by the
/// sender therefore run closest to the value's origin.
pub(super) struct InterceptorList<T> {
    stages: VecDeque<Stage<T>>,
}

impl<T> Default for InterceptorList<T> {
    fn default() -> Self {
        InterceptorList { stages: VecDeque::new() }
    }
}

impl<T> InterceptorList<T> {
    pub(super) fn prepend(
        &mut self,
        transform: Transform<T>,
        on_half_close: Option<HalfCloseHook>,
    ) {
        self.stages.push_front(Stage { transform, on_half_close });
    }

    pub(super) fn append(
        &mut self,
        transform: Transform<T>,
        on_half_close: Option<HalfCloseHook>,
    ) {
        self.stages.push_back(Stage { transform, on_half_close });
    }

    /// Run a value through every stage in order. A stage yielding `None`
    /// short-circuits the rest of the chain.
    pub(super) fn run(&mut self, mut value: T) -> Option<T> {
        for stage in &mut self.stages {
            value = (stage.transform)(value)?;
        }
        Some(value)
    }

    /// Take the whole list, leaving this one empty.
    pub(super) fn detach(&mut self) -> InterceptorList<T> {
        std::mem::take(self)
    }

    /// Consume the list on the clean-close path, firing each half-close
    /// hook. The cancel path drops the list instead, firing nothing.
    pub(super) fn half_close(self) {
        for stage in self.stages {
            if let Some(hook) = stage.on_half_close {
                hook();
            }
        }
    }
}
