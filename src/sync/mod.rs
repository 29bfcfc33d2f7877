mod completion;
mod event;
pub(crate) mod time;

pub(crate) use completion::Completion;
pub(crate) use event::Signal;
