pub mod seq_count;

pub use seq_count::SeqCount;
