//! Infrastructure backing the engine's traits

pub mod db;
