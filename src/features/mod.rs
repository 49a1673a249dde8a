pub mod ledger;
pub mod result_sink;
pub mod station_input;
