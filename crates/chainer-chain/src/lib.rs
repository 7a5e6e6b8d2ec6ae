//! Chain orchestration across downstream MCP tools.
//!
//! A chain is a list of steps, each naming a registered tool and a JSON
//! argument template. The previous step's output replaces the `CHAIN_RESULT`
//! sentinel in the next template, optionally filtered through JSONPath on
//! either side of the hop, so intermediate payloads stay inside the server.

pub mod error;
pub mod executor;
pub mod extract;
pub mod step;
pub mod template;

pub use error::ChainError;
pub use executor::{run_chain, validate};
pub use step::ChainStep;
pub use template::{Carry, SENTINEL};
