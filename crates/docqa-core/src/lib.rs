#![deny(warnings)]
#![deny(dead_code)]
#![deny(unused_variables)]
#![deny(unused_imports)]

//! Shared vocabulary of the docqa workspace: data model, collaborator traits,
//! error taxonomy, configuration, logging and the text-file document source.

pub mod config;
pub mod data_processor;
pub mod error;
pub mod logging;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
