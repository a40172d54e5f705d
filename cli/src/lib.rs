pub mod run_cmd;

pub use run_cmd::RunArgs;
pub use run_cmd::process_exit_code;
pub use run_cmd::run;
