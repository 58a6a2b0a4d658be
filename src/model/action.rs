//! Cache action policies.

/// The cache effect a query applies when a row it covers is written or
/// selected.
///
/// Deletes always apply [`CacheAction::Del`]; the declared actions cover
/// inserts, updates, and selects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CacheAction {
    /// Leave the cache untouched.
    #[default]
    None,
    /// Store the full row under the query's scalar key.
    Set,
    /// Delete the query's scalar key.
    Del,
    /// Push the row's primary key onto the head of the id-list.
    LPush,
    /// Push the row's primary key onto the tail of the id-list.
    RPush,
}

impl CacheAction {
    /// The data-structure class this action implies, if any.
    ///
    /// `None` and `Del` are class-neutral: they are valid against both a
    /// scalar key and a list key.
    pub(crate) fn data_structure(self) -> Option<DataStructure> {
        match self {
            CacheAction::Set => Some(DataStructure::Scalar),
            CacheAction::LPush | CacheAction::RPush => Some(DataStructure::List),
            CacheAction::None | CacheAction::Del => None,
        }
    }
}

/// What a query's cache key holds: one row, or an id-list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DataStructure {
    Scalar,
    List,
}

/// Derive the query's data structure from its three actions.
///
/// All class-carrying actions must agree; a query whose actions are all
/// neutral has no structure and never materializes a key.
pub(crate) fn classify_actions(
    insert: CacheAction,
    update: CacheAction,
    select: CacheAction,
) -> Result<Option<DataStructure>, String> {
    let mut structure = None;
    for action in [insert, update, select] {
        let Some(class) = action.data_structure() else {
            continue;
        };
        match structure {
            None => structure = Some(class),
            Some(existing) if existing != class => {
                return Err("all cache actions must target the same data structure".to_string());
            }
            Some(_) => {}
        }
    }
    Ok(structure)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_scalar_actions_classify_scalar() {
        let structure =
            classify_actions(CacheAction::Set, CacheAction::Set, CacheAction::Set).expect("ok");
        assert_eq!(structure, Some(DataStructure::Scalar));
    }

    #[test]
    fn list_actions_classify_list() {
        let structure =
            classify_actions(CacheAction::RPush, CacheAction::None, CacheAction::RPush)
                .expect("ok");
        assert_eq!(structure, Some(DataStructure::List));
    }

    #[test]
    fn neutral_actions_have_no_structure() {
        let structure =
            classify_actions(CacheAction::None, CacheAction::Del, CacheAction::None).expect("ok");
        assert_eq!(structure, None);
    }

    #[test]
    fn mixed_classes_are_rejected() {
        let err =
            classify_actions(CacheAction::Set, CacheAction::LPush, CacheAction::None).unwrap_err();
        assert!(err.contains("same data structure"));
    }
}
