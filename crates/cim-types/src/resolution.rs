use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::client::ClientRecord;
use crate::error::TypeError;

/// A client field whose value can be chosen by the caller during a merge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResolvableField {
    FirstName,
    LastName,
    Email,
    Phone,
    Birthday,
    Notes,
    MarketingOptIn,
}

impl ResolvableField {
    pub const ALL: [ResolvableField; 7] = [
        Self::FirstName,
        Self::LastName,
        Self::Email,
        Self::Phone,
        Self::Birthday,
        Self::Notes,
        Self::MarketingOptIn,
    ];

    /// Wire name of the field.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FirstName => "firstName",
            Self::LastName => "lastName",
            Self::Email => "email",
            Self::Phone => "phone",
            Self::Birthday => "birthday",
            Self::Notes => "notes",
            Self::MarketingOptIn => "marketingOptIn",
        }
    }
}

impl fmt::Display for ResolvableField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-chosen winning values for the canonical record.
///
/// Each field is optional: an absent field keeps the primary's current value.
/// Unknown keys are rejected at deserialization time, so the set of fields a
/// merge can touch is fixed by this type.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FieldResolutions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birthday: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marketing_opt_in: Option<bool>,
}

impl FieldResolutions {
    pub fn is_empty(&self) -> bool {
        self.fields().is_empty()
    }

    /// The fields this resolution set writes, in declaration order.
    pub fn fields(&self) -> Vec<ResolvableField> {
        let present = [
            self.first_name.is_some(),
            self.last_name.is_some(),
            self.email.is_some(),
            self.phone.is_some(),
            self.birthday.is_some(),
            self.notes.is_some(),
            self.marketing_opt_in.is_some(),
        ];
        ResolvableField::ALL
            .into_iter()
            .zip(present)
            .filter_map(|(field, set)| set.then_some(field))
            .collect()
    }

    /// Structural checks on the supplied values.
    pub fn validate(&self) -> Result<(), TypeError> {
        for (field, value) in [
            (ResolvableField::FirstName, &self.first_name),
            (ResolvableField::LastName, &self.last_name),
        ] {
            if matches!(value, Some(v) if v.trim().is_empty()) {
                return Err(TypeError::InvalidField {
                    field: field.to_string(),
                    reason: "must not be blank".into(),
                });
            }
        }
        if let Some(email) = &self.email {
            if !email.contains('@') {
                return Err(TypeError::InvalidField {
                    field: ResolvableField::Email.to_string(),
                    reason: format!("'{email}' is not an email address"),
                });
            }
        }
        Ok(())
    }

    /// Write every supplied value onto `record`. Fields not supplied are left
    /// untouched.
    pub fn apply_to(&self, record: &mut ClientRecord) {
        if let Some(v) = &self.first_name {
            record.first_name = v.clone();
        }
        if let Some(v) = &self.last_name {
            record.last_name = v.clone();
        }
        if let Some(v) = &self.email {
            record.email = Some(v.clone());
        }
        if let Some(v) = &self.phone {
            record.phone = Some(v.clone());
        }
        if let Some(v) = self.birthday {
            record.birthday = Some(v);
        }
        if let Some(v) = &self.notes {
            record.notes = Some(v.clone());
        }
        if let Some(v) = self.marketing_opt_in {
            record.marketing_opt_in = v;
        }
    }

    /// Every field either set writes, taking `later`'s value where both do.
    pub fn combined_with(&self, later: &FieldResolutions) -> FieldResolutions {
        FieldResolutions {
            first_name: later.first_name.clone().or_else(|| self.first_name.clone()),
            last_name: later.last_name.clone().or_else(|| self.last_name.clone()),
            email: later.email.clone().or_else(|| self.email.clone()),
            phone: later.phone.clone().or_else(|| self.phone.clone()),
            birthday: later.birthday.or(self.birthday),
            notes: later.notes.clone().or_else(|| self.notes.clone()),
            marketing_opt_in: later.marketing_opt_in.or(self.marketing_opt_in),
        }
    }

    /// Copy the fields this resolution set writes from `source` back onto
    /// `record`.
    ///
    /// Used when reverting a merge: the resolved fields return to their
    /// snapshotted values while every other column keeps its current value.
    pub fn restore_from(&self, source: &ClientRecord, record: &mut ClientRecord) {
        for field in self.fields() {
            match field {
                ResolvableField::FirstName => record.first_name = source.first_name.clone(),
                ResolvableField::LastName => record.last_name = source.last_name.clone(),
                ResolvableField::Email => record.email = source.email.clone(),
                ResolvableField::Phone => record.phone = source.phone.clone(),
                ResolvableField::Birthday => record.birthday = source.birthday,
                ResolvableField::Notes => record.notes = source.notes.clone(),
                ResolvableField::MarketingOptIn => record.marketing_opt_in = source.marketing_opt_in,
            }
        }
    }
}
