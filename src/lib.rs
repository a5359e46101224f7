#![doc = include_str!("../README.md")]
#![deny(unstable_features)]
#![deny(trivial_casts)]
#![deny(unconditional_recursion)]
#![deny(clippy::empty_loop)]
#![deny(unreachable_code)]
#![deny(unreachable_pub)]
#![deny(unreachable_patterns)]
#![deny(unused_macro_rules)]

pub mod chazelle;
pub mod external;
pub mod intervals;
pub mod schmidt;
pub mod traits;
pub mod utils;

/// Prelude module to import everything from this crate
pub mod prelude {
    pub use crate::chazelle::*;
    pub use crate::external::*;
    pub use crate::intervals::*;
    pub use crate::schmidt::*;
    pub use crate::traits::*;
    pub use crate::utils::*;
}
