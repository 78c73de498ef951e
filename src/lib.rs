//! raidmesh: a redundant storage array over one owner's own devices.
//!
//! Desktops, phones and browser sessions register as array members, send
//! heartbeats, and hold chunks of the owner's files according to a RAID
//! policy (1 = mirror, 5 = rotating XOR parity, 10 = mirrored stripes).
//! Devices disappear without warning, so liveness is always derived from
//! heartbeat staleness, every stored byte is hash-verified against a trusted
//! digest, and a healing pass marks copies on offline devices for
//! reconstruction from parity or surviving mirrors.

pub mod api;
pub mod array;
pub mod chunk;
pub mod db;
pub mod device;
pub mod heal;
pub mod integrity;
pub mod metrics;
pub mod physical;
