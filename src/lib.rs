//! nf3 - addon installer for large modpacks
//!
//! Reads a tab-delimited addon catalog, fetches each archive from its source
//! (mirror-selecting file host, direct link or git repository), extracts it
//! and normalizes the result into a Mod Organizer `mods/` folder.

pub mod archive;
pub mod catalog;
pub mod downloaders;
pub mod error;
pub mod hash;
pub mod installer;
pub mod logging;
pub mod paths;
pub mod process;
pub mod settings;
pub mod tools;

pub use error::{Error, Result};
