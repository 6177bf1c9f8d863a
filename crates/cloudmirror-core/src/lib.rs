//! CloudMirror Core - Domain types and collaborator boundaries
//!
//! This crate contains the hexagonal architecture core with:
//! - **Domain types** - `SyncPairConfig`, `SyncPairState`, `DisableReason`, `TransferInfo`, `AccountQuotaState`
//! - **Port definitions** - Traits for adapters: `IEngine`, `IPreferencesStore`, `IPlatformIntegration`, `INotificationService`
//! - **Configuration** - The daemon's YAML configuration
//! - **Preferences store** - `YamlPreferences`, the YAML-backed `IPreferencesStore`
//!
//! # Architecture
//!
//! This crate follows the hexagonal (ports & adapters) architecture pattern.
//! The domain module contains pure data and classification rules.
//! Ports define trait interfaces that the orchestration layer drives and
//! adapter code implements.

pub mod config;
pub mod domain;
pub mod ports;
pub mod store;
