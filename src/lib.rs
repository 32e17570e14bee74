//! Acquisition core for fx2lafw-family logic analyzers: protocol
//! state machines, trigger matching, and packet emission, decoupled
//! from any particular USB transport via [`host_controller`].
#![cfg_attr(not(feature = "std"), no_std)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]
#![cfg_attr(docsrs, feature(doc_cfg_hide))]
#![cfg_attr(docsrs, doc(cfg_hide(doc)))]

pub mod acquisition;
pub mod config;
pub mod error;
pub mod host;
pub mod host_controller;
pub mod log;
pub mod packet;
pub mod profile;
pub mod trigger;
pub mod wire;

pub use error::{Fx2LafwError, ProtocolError};
