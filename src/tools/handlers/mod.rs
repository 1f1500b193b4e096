// Copyright 2026 Forge Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Built-in tool handlers.

pub mod control;
pub mod demo;
