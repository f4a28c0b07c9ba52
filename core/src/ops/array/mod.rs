mod pad;

pub use self::pad::{Pad, PadMode};
