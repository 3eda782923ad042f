// cursive0: bootstrap compiler and reference interpreter core for the
// Cursive language.
//
// Copyright (C) 2019  Brandon Lewis
//
// This program is free software: you can redistribute it and/or
// modify it under the terms of the GNU Lesser General Public License
// as published by the Free Software Foundation, either version 3 of
// the License, or (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public
// License along with this program.  If not, see
// <https://www.gnu.org/licenses/>.

extern crate log;
extern crate ron;
extern crate serde;
extern crate unicode_normalization;
#[macro_use]
extern crate lazy_static;


pub mod abi;
pub mod apply;
pub mod ast;
pub mod builtins;
pub mod checks;
pub mod config;
pub mod context;
pub mod encode;
pub mod eval;
pub mod exec;
pub mod fs;
pub mod hash;
pub mod layout;
pub mod mangle;
pub mod matching;
pub mod paths;
pub mod pattern;
pub mod resolve;
pub mod runtime;
pub mod sigma;
pub mod span;
pub mod types;
pub mod value;
