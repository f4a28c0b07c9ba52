mod conv;
mod padding;

pub use self::conv::Conv1d;
pub use self::padding::{ComputedPaddedDim, PaddingMode, PaddingSpec};
