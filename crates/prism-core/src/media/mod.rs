// Copyright 2025 eraflo
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

//! The frame handoff contract between media decoders and the graphics layer.
//!
//! Decoders themselves live outside this crate; they only produce [`Picture`]s.

mod picture;

pub use self::picture::{
    MemoryLocation, Picture, PictureFormat, PicturePlane, PictureStorage, MAX_PICTURE_PLANES,
};
