// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Core domain model: driver metadata, value validation, schedules,
//! projects and server events.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod event;
pub mod meta;
pub mod project;
pub mod schedule;
pub mod validate;

pub use event::ServerEvent;
pub use meta::{
    CommandMeta, ConfigApply, ConfigSchema, Constraints, DriverInfo, DriverMeta, EventMeta,
    FieldMeta, FieldType, ReturnMeta, UiHint,
};
pub use project::{Project, ProjectParseError};
pub use schedule::{Schedule, ScheduleError};
pub use validate::{
    fill_defaults, validate_config_fields, validate_field, validate_object, validate_params,
    ValidationError, ValidationResult, VALIDATION_ERROR_CODE,
};
