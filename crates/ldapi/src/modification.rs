//! Validated builder for one element of a batch modification.

use crate::engine::{BatchOp, BatchOperation};
use ldapi_core::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// Operation applied by a [`Modification`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModOperation {
    /// Add the values to the attribute.
    Add,
    /// Remove the listed values from the attribute.
    Remove,
    /// Remove the attribute with all of its values.
    RemoveAll,
    /// Replace every value of the attribute.
    Replace,
}

impl ModOperation {
    /// Conventional numeric code of the operation.
    #[must_use]
    pub const fn code(self) -> i64 {
        match self {
            Self::Add => 1,
            Self::Remove => 2,
            Self::RemoveAll => 18,
            Self::Replace => 3,
        }
    }

    /// Maps a numeric code to an operation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidMode`] for codes other than 1, 2, 18 and 3.
    pub fn from_code(code: i64) -> Result<Self> {
        match code {
            1 => Ok(Self::Add),
            2 => Ok(Self::Remove),
            18 => Ok(Self::RemoveAll),
            3 => Ok(Self::Replace),
            _ => Err(Error::InvalidMode(format!(
                "operation code {code} is not add (1), remove (2), remove_all (18) or replace (3)"
            ))),
        }
    }
}

impl fmt::Display for ModOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Add => "add",
            Self::Remove => "remove",
            Self::RemoveAll => "remove_all",
            Self::Replace => "replace",
        })
    }
}

impl FromStr for ModOperation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "add" => Ok(Self::Add),
            "remove" => Ok(Self::Remove),
            "remove_all" => Ok(Self::RemoveAll),
            "replace" => Ok(Self::Replace),
            _ => Err(Error::InvalidMode(format!(
                "operation `{s}` must be one of add, remove, remove_all, replace"
            ))),
        }
    }
}

impl From<ModOperation> for BatchOp {
    fn from(op: ModOperation) -> Self {
        match op {
            ModOperation::Add => Self::Add,
            ModOperation::Remove => Self::Remove,
            ModOperation::RemoveAll => Self::RemoveAll,
            ModOperation::Replace => Self::Replace,
        }
    }
}

/// One attribute change submitted through
/// [`Directory::modify_batch`](crate::Directory::modify_batch).
///
/// Setting the operation to [`ModOperation::RemoveAll`] clears any staged values,
/// and values cannot be set while the operation is `RemoveAll`. Completeness
/// (attribute name, operation, non-empty values) is checked at submission.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Modification {
    attribute_name: Option<String>,
    operation: Option<ModOperation>,
    values: Vec<Vec<u8>>,
}

impl Modification {
    /// Creates an empty modification.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `values` to `attribute`.
    #[must_use]
    pub fn add<I, V>(attribute: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Vec<u8>>,
    {
        Self::with_values(attribute, ModOperation::Add, values)
    }

    /// Removes `values` from `attribute`.
    #[must_use]
    pub fn remove<I, V>(attribute: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Vec<u8>>,
    {
        Self::with_values(attribute, ModOperation::Remove, values)
    }

    /// Removes `attribute` entirely.
    #[must_use]
    pub fn remove_all(attribute: impl Into<String>) -> Self {
        Self {
            attribute_name: Some(attribute.into()),
            operation: Some(ModOperation::RemoveAll),
            values: Vec::new(),
        }
    }

    /// Replaces every value of `attribute` with `values`.
    #[must_use]
    pub fn replace<I, V>(attribute: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Vec<u8>>,
    {
        Self::with_values(attribute, ModOperation::Replace, values)
    }

    fn with_values<I, V>(attribute: impl Into<String>, operation: ModOperation, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Vec<u8>>,
    {
        Self {
            attribute_name: Some(attribute.into()),
            operation: Some(operation),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Attribute being changed.
    #[must_use]
    pub fn attribute_name(&self) -> Option<&str> {
        self.attribute_name.as_deref()
    }

    /// Operation to apply.
    #[must_use]
    pub const fn operation(&self) -> Option<ModOperation> {
        self.operation
    }

    /// Staged values; always empty for [`ModOperation::RemoveAll`].
    #[must_use]
    pub fn values(&self) -> &[Vec<u8>] {
        &self.values
    }

    /// Sets the attribute name.
    pub fn set_attribute_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.attribute_name = Some(name.into());
        self
    }

    /// Sets the operation. `RemoveAll` discards any staged values.
    pub fn set_operation(&mut self, operation: ModOperation) -> &mut Self {
        self.operation = Some(operation);
        if operation == ModOperation::RemoveAll {
            self.values.clear();
        }
        self
    }

    /// Sets the operation from its numeric code.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidMode`] for unknown codes.
    pub fn set_operation_code(&mut self, code: i64) -> Result<&mut Self> {
        let operation = ModOperation::from_code(code)?;
        Ok(self.set_operation(operation))
    }

    /// Replaces the staged values.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidMode`] when the operation is `RemoveAll`.
    pub fn set_values<I, V>(&mut self, values: I) -> Result<&mut Self>
    where
        I: IntoIterator<Item = V>,
        V: Into<Vec<u8>>,
    {
        if self.operation == Some(ModOperation::RemoveAll) {
            return Err(Error::InvalidMode(
                "remove_all operations cannot include a value set".to_string(),
            ));
        }

        self.values = values.into_iter().map(Into::into).collect();
        Ok(self)
    }

    /// Checks completeness and converts to the engine representation.
    ///
    /// `index` identifies the element in error messages.
    pub(crate) fn to_batch_operation(&self, index: usize) -> Result<BatchOperation> {
        let attribute = self.attribute_name.as_deref().ok_or_else(|| {
            Error::IncompleteModification(format!(
                "modification {index} does not define an attribute"
            ))
        })?;
        let operation = self.operation.ok_or_else(|| {
            Error::IncompleteModification(format!(
                "modification {index} does not define an operation"
            ))
        })?;

        match operation {
            ModOperation::RemoveAll if !self.values.is_empty() => {
                return Err(Error::InvalidValueSet(format!(
                    "modification {index} is remove_all but carries a value set"
                )));
            }
            ModOperation::Add | ModOperation::Remove | ModOperation::Replace
                if self.values.is_empty() =>
            {
                return Err(Error::IncompleteModification(format!(
                    "modification {index} does not define a value set"
                )));
            }
            _ => {}
        }

        Ok(BatchOperation {
            attribute: attribute.to_string(),
            op: operation.into(),
            values: self.values.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remove_all_clears_staged_values() {
        let mut modification = Modification::new();
        modification
            .set_attribute_name("mail")
            .set_operation(ModOperation::Replace);
        modification.set_values(["a@example.com"]).unwrap();
        assert_eq!(modification.values().len(), 1);

        modification.set_operation(ModOperation::RemoveAll);
        assert!(modification.values().is_empty());
    }

    #[test]
    fn remove_all_rejects_values() {
        let mut modification = Modification::remove_all("mail");
        let err = modification.set_values(["a@example.com"]).unwrap_err();
        assert!(matches!(err, Error::InvalidMode(_)));
        assert!(modification.values().is_empty());
    }

    #[test]
    fn operation_codes() {
        assert_eq!(ModOperation::from_code(18).unwrap(), ModOperation::RemoveAll);
        assert!(matches!(
            ModOperation::from_code(4),
            Err(Error::InvalidMode(_))
        ));
        assert_eq!("REPLACE".parse::<ModOperation>().unwrap(), ModOperation::Replace);
        assert!(matches!(
            "increment".parse::<ModOperation>(),
            Err(Error::InvalidMode(_))
        ));

        let mut modification = Modification::new();
        assert!(modification.set_operation_code(9).is_err());
        assert!(modification.operation().is_none());
        modification.set_operation_code(2).unwrap();
        assert_eq!(modification.operation(), Some(ModOperation::Remove));
    }

    #[test]
    fn incomplete_modifications() {
        let missing_attribute = {
            let mut m = Modification::new();
            m.set_operation(ModOperation::Add);
            m
        };
        assert!(matches!(
            missing_attribute.to_batch_operation(0),
            Err(Error::IncompleteModification(_))
        ));

        let mut missing_operation = Modification::new();
        missing_operation.set_attribute_name("cn");
        assert!(matches!(
            missing_operation.to_batch_operation(1),
            Err(Error::IncompleteModification(_))
        ));

        let missing_values = Modification::add("cn", Vec::<Vec<u8>>::new());
        let err = missing_values.to_batch_operation(2).unwrap_err();
        assert!(matches!(err, Error::IncompleteModification(_)));
        assert!(err.to_string().contains("modification 2"));
    }

    #[test]
    fn converts_to_batch_operation() {
        let op = Modification::replace("description", ["first", "second"])
            .to_batch_operation(0)
            .unwrap();
        assert_eq!(op.attribute, "description");
        assert_eq!(op.op, BatchOp::Replace);
        assert_eq!(op.values, vec![b"first".to_vec(), b"second".to_vec()]);

        let op = Modification::remove_all("description")
            .to_batch_operation(0)
            .unwrap();
        assert_eq!(op.op, BatchOp::RemoveAll);
        assert!(op.values.is_empty());
    }
}
