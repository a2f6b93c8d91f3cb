pub mod session_reader;

pub use session_reader::SessionReader;
