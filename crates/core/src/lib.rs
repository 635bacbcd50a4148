//! Recast core: format reconciliation and PCM mixing for reconstructed recordings

pub mod domain;
