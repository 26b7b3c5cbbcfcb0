pub mod market;
pub mod numeric;
pub mod trading;

pub use market::*;
pub use numeric::*;
pub use trading::*;
