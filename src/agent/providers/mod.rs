//! The three provider variants named in spec §4.3, all implementing the
//! same `Provider::call` contract.

pub mod cli_subprocess;
pub mod hosted_chat;
pub mod local_http;

pub use cli_subprocess::CliSubprocessProvider;
pub use hosted_chat::HostedChatProvider;
pub use local_http::LocalHttpProvider;
