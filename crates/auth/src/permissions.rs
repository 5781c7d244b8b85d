use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Action identifier checked against an IAM resource.
///
/// Actions are opaque strings (e.g. "read", "delete"). The special action
/// `"own"` implies every other action on the same resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IamAction(Cow<'static, str>);

impl IamAction {
    pub const READ: IamAction = IamAction(Cow::Borrowed("read"));
    pub const WRITE: IamAction = IamAction(Cow::Borrowed("write"));
    pub const DELETE: IamAction = IamAction(Cow::Borrowed("delete"));
    pub const OWN: IamAction = IamAction(Cow::Borrowed("own"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_owner(&self) -> bool {
        self.as_str() == "own"
    }
}

impl core::fmt::Display for IamAction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
