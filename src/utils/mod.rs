/*
 * SPDX-FileCopyrightText: 2023 Inria
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Collection of common functions we use throughout the codebase

mod mmap_backend;
pub use mmap_backend::*;

mod status_list;
pub use status_list::*;
