//! Key scanning and touch gestures

mod debounce;
mod scanner;
mod touch;

pub use debounce::DebounceState;
pub use scanner::{EdgeKind, InputScanner, KeyEdge};
pub use touch::{TouchEvent, TouchSwitch};
