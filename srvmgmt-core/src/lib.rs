//! Domain types and host boundary for the `srvmgmt` management protocol.
//!
//! The protocol engine in `srvmgmt-server` never touches game state directly.  Everything it can
//! observe or mutate is reached through the [`ManagementApi`] trait implemented by the host
//! process, and everything that must run serialized with the host's simulation loop is handed to
//! that loop through the [`main_thread`] queue.
mod error;
mod main_thread;
pub mod models;
mod services;

pub use error::{HandOffError, ServiceError, panic_message};
pub use main_thread::{MainThreadHandle, MainThreadQueue, is_main_thread, main_thread};
pub use services::{
    AllowListService, GameRuleService, HostApi, IpBanService, ManagementApi, PlayerService,
    ServerSettingsService, ServerStateService, UserBanService,
};
