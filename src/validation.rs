// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Declarative field-constraint validation.
//!
//! Request types describe their fields and the rules each must satisfy through
//! [`Validate`]; a [`Validator`] checks those descriptions and reports every
//! violation as a [`FieldError`]. The validator holds no state, so a single
//! instance can be shared behind an `Arc<dyn Validator>`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum length of an owner identifier.
pub const OWNER_ID_MAX_LEN: usize = 36;

/// A single constraint on a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    /// Text must be non-empty.
    Required,
    /// Text length (in characters) must lie within `min..=max`.
    Length { min: usize, max: usize },
    /// Integer must be strictly greater than zero.
    Positive,
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rule::Required => write!(f, "is required"),
            Rule::Length { min, max } => write!(f, "length must be between {min} and {max}"),
            Rule::Positive => write!(f, "must be positive"),
        }
    }
}

/// The value of a field under validation.
#[derive(Debug, Clone, Copy)]
pub enum Value<'a> {
    Text(&'a str),
    Integer(i64),
}

/// A field, its current value and the rules it must satisfy.
#[derive(Debug, Clone, Copy)]
pub struct Field<'a> {
    pub name: &'static str,
    pub value: Value<'a>,
    pub rules: &'static [Rule],
}

/// A violated rule on a named field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub rule: Rule,
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.field, self.rule)
    }
}

/// Implemented by request types to describe their constrained fields.
pub trait Validate {
    fn fields(&self) -> Vec<Field<'_>>;
}

/// Checks field descriptions against their rules.
pub trait Validator: Send + Sync {
    fn validate(&self, fields: &[Field<'_>]) -> Vec<FieldError>;
}

/// Stateless validator applying [`Rule`]s as written.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConstraintValidator;

impl ConstraintValidator {
    fn satisfies(rule: Rule, value: Value<'_>) -> bool {
        match (rule, value) {
            (Rule::Required, Value::Text(text)) => !text.is_empty(),
            (Rule::Required, Value::Integer(_)) => true,
            (Rule::Length { min, max }, Value::Text(text)) => {
                let len = text.chars().count();
                min <= len && len <= max
            }
            (Rule::Positive, Value::Integer(n)) => n > 0,
            // Rule declared on the wrong kind of value
            (Rule::Length { .. }, Value::Integer(_)) | (Rule::Positive, Value::Text(_)) => false,
        }
    }
}

impl Validator for ConstraintValidator {
    fn validate(&self, fields: &[Field<'_>]) -> Vec<FieldError> {
        fields
            .iter()
            .flat_map(|field| {
                field
                    .rules
                    .iter()
                    .filter(|rule| !Self::satisfies(**rule, field.value))
                    .map(|rule| FieldError {
                        field: field.name,
                        rule: *rule,
                    })
            })
            .collect()
    }
}

/// Request to initialize a wallet for an owner.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct InitializeWalletRequest {
    pub owner_id: String,
}

impl InitializeWalletRequest {
    pub fn new(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
        }
    }
}

impl Validate for InitializeWalletRequest {
    fn fields(&self) -> Vec<Field<'_>> {
        vec![Field {
            name: "owner_id",
            value: Value::Text(&self.owner_id),
            rules: &[
                Rule::Required,
                Rule::Length {
                    min: 1,
                    max: OWNER_ID_MAX_LEN,
                },
            ],
        }]
    }
}

/// Request to deposit or withdraw `amount` under a caller-supplied reference.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TransactionRequest {
    pub amount: i64,
    pub reference_id: String,
}

impl TransactionRequest {
    pub fn new(amount: i64, reference_id: impl Into<String>) -> Self {
        Self {
            amount,
            reference_id: reference_id.into(),
        }
    }
}

impl Validate for TransactionRequest {
    fn fields(&self) -> Vec<Field<'_>> {
        vec![
            Field {
                name: "amount",
                value: Value::Integer(self.amount),
                rules: &[Rule::Positive],
            },
            Field {
                name: "reference_id",
                value: Value::Text(&self.reference_id),
                rules: &[Rule::Required],
            },
        ]
    }
}
