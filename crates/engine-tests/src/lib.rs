#![allow(dead_code)]

pub mod backfill;
pub mod support;
pub mod tail;
