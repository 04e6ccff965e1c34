pub mod operation_reader;
pub mod settlement_reader;
pub mod wallet_writer;
