//! Sitekeeper Daemon - Device polling and control loop
//!
//! This crate provides the core infrastructure for the sitekeeper daemon:
//! - `config` - TOML configuration (site settings, thresholds, device table)
//! - `devices` - device capability trait plus the relay and Modbus variants
//! - `manager` - device registry, polling-task launcher and watchdog sweep
//! - `control` - the 10-second decision cycle (aggregation, hysteresis,
//!   status projection, alarm edge detection)
//! - `inbound` - server-to-daemon command dispatch
//! - `supervisor` - restart-on-failure shell around the control loop
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     sitekeeperd daemon                       │
//! ├──────────────────────────────────────────────────────────────┤
//! │                                                              │
//! │  ┌────────────────┐      ┌─────────────────────────────┐    │
//! │  │   Supervisor   │─────▶│        ControlLoop          │    │
//! │  │ (restart shell)│      │ (tick: averages, hysteresis,│    │
//! │  └────────────────┘      │  statuses, alarms, watchdog)│    │
//! │                          └──────────────┬──────────────┘    │
//! │                                         │ find/watchdog     │
//! │  ┌────────────────┐      ┌──────────────▼──────────────┐    │
//! │  │  inbound task  │─────▶│       DeviceManager         │    │
//! │  │ (server cmds)  │      │  (registry + poll tasks)    │    │
//! │  └────────────────┘      └──────────────┬──────────────┘    │
//! │                                         │ one task/device   │
//! │                          ┌──────────────▼──────────────┐    │
//! │                          │   RelayDevice, ModbusDevice │    │
//! │                          └─────────────────────────────┘    │
//! │                                                              │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! All telemetry reads and writes go through an `Arc<dyn Controller>`
//! injected at construction; there are no process-wide singletons.
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod config;
pub mod control;
pub mod devices;
pub mod inbound;
pub mod manager;
pub mod supervisor;
