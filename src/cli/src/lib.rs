//! OVA Import CLI - inspect appliance archives and plan imports offline.

pub mod commands;
pub mod output;
