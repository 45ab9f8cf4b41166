pub mod local;
pub mod memory;
pub mod mock;
pub mod openai;
pub mod sqlite;
