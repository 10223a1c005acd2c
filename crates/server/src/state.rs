//! Application state shared by HTTP handlers.

use crate::registry::RegistryHandle;
use crate::signer::Signer;

pub struct AppState {
    pub registry: RegistryHandle,
    pub signer: Signer,
}

impl AppState {
    pub fn new(registry: RegistryHandle, signer: Signer) -> Self {
        Self { registry, signer }
    }
}
