#![cfg_attr(not(feature = "std"), no_std)]

pub mod datapath;
pub mod identity;
pub mod ipsec;
pub mod key;
pub mod mark;
