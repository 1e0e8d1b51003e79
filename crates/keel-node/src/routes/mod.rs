// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
pub mod chat;
pub mod configs;
pub mod permissions;
pub mod pty;
pub mod sessions;
