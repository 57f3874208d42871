// Copyright 2025 dentsusoken
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Operator subcommands against the file-backed keyed store.

pub mod expire;
pub mod hold;
pub mod list;
pub mod status;

use crate::config::RegistryConfig;
use crate::error::Result;
use crate::keyed::{FileKeyedStore, KeyedStoreLockRegistry, KeyedStoreRegistryBuilder};
use log::debug;
use std::fs;
use std::sync::Arc;

/// Registry builder over the store directory of `config`, created on demand.
pub(crate) fn registry_builder(config: &RegistryConfig) -> Result<KeyedStoreRegistryBuilder> {
    let store_dir = config.store_dir();
    fs::create_dir_all(&store_dir)?;
    debug!("Using lock store at {}", store_dir.display());

    let store = Arc::new(FileKeyedStore::new(store_dir));
    Ok(KeyedStoreLockRegistry::builder(store, &config.keyed_store))
}

pub(crate) fn open_registry(config: &RegistryConfig) -> Result<KeyedStoreLockRegistry> {
    Ok(registry_builder(config)?.build())
}
