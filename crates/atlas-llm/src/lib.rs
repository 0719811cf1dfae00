//! Generation-service boundary for Atlas.
//!
//! Everything above this crate talks to the hosted text-generation service
//! through [`ProviderAdapter`] and the typed [`Request`] / [`Response`] /
//! [`StreamEvent`] model defined here. Raw provider JSON never leaves the
//! adapter modules.

pub mod errors;
pub mod openai;
pub mod provider;
pub mod stream;
pub mod types;
pub mod utils;

#[allow(unused_imports)]
pub use errors::*;
#[allow(unused_imports)]
pub use openai::*;
#[allow(unused_imports)]
pub use provider::*;
#[allow(unused_imports)]
pub use stream::*;
#[allow(unused_imports)]
pub use types::*;
#[allow(unused_imports)]
pub use utils::*;
