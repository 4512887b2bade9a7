#![allow(dead_code)]

pub mod fake_room;
pub mod status_server;
