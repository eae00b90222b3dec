// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/rideau-sim

//! Security module - device credentials and SAS token signing

mod credentials;

pub use credentials::*;
