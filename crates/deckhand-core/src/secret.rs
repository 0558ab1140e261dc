//! Deferred environment values.
//!
//! Runtime consumers (the migration function, the application container)
//! need a resolved connection string, but credential material must never
//! appear in a synthesized plan. An [`EnvValue`] is therefore stored as a
//! sequence of fragments: literal text, references to fields of a managed
//! secret, and references to attributes of other resources that only exist
//! after provisioning. Values are resolved at apply time through a
//! [`ValueResolver`] and come back wrapped in [`SecretString`].

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error::ResolveError;
use crate::resource::ResourceId;

/// Reference to one JSON field of a managed secret.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SecretRef {
    pub secret: ResourceId,
    pub field: String,
}

impl SecretRef {
    pub fn new(secret: &ResourceId, field: &str) -> Self {
        Self {
            secret: secret.clone(),
            field: field.to_string(),
        }
    }
}

/// One piece of a deferred value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Fragment {
    Text { value: String },
    Secret { secret: SecretRef },
    Attr { resource: ResourceId, attribute: String },
}

/// Resolves secret fields and resource attributes at apply time.
pub trait ValueResolver {
    fn secret(&self, reference: &SecretRef) -> Result<SecretString, ResolveError>;

    fn attribute(&self, resource: &ResourceId, attribute: &str) -> Result<String, ResolveError>;
}

/// An environment value that may depend on secrets and provisioned resources.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnvValue {
    fragments: Vec<Fragment>,
}

impl EnvValue {
    pub fn literal(value: &str) -> Self {
        Self::default().text(value)
    }

    pub fn text(mut self, value: &str) -> Self {
        // Adjacent text fragments are merged so equal values compare equal.
        if let Some(Fragment::Text { value: last }) = self.fragments.last_mut() {
            last.push_str(value);
        } else {
            self.fragments.push(Fragment::Text {
                value: value.to_string(),
            });
        }
        self
    }

    pub fn secret(mut self, reference: SecretRef) -> Self {
        self.fragments.push(Fragment::Secret { secret: reference });
        self
    }

    pub fn attr(mut self, resource: &ResourceId, attribute: &str) -> Self {
        self.fragments.push(Fragment::Attr {
            resource: resource.clone(),
            attribute: attribute.to_string(),
        });
        self
    }

    pub fn fragments(&self) -> &[Fragment] {
        &self.fragments
    }

    /// Every resource this value reads from.
    pub fn references(&self) -> impl Iterator<Item = &ResourceId> {
        self.fragments.iter().filter_map(|f| match f {
            Fragment::Text { .. } => None,
            Fragment::Secret { secret } => Some(&secret.secret),
            Fragment::Attr { resource, .. } => Some(resource),
        })
    }

    /// True if resolving this value reads a secret.
    pub fn is_sensitive(&self) -> bool {
        self.fragments
            .iter()
            .any(|f| matches!(f, Fragment::Secret { .. }))
    }

    /// Placeholder rendering, safe for logs and synthesized artifacts.
    pub fn redacted(&self) -> String {
        let mut out = String::new();
        for fragment in &self.fragments {
            match fragment {
                Fragment::Text { value } => out.push_str(value),
                Fragment::Secret { secret } => {
                    out.push_str(&format!("{{{{secret:{}#{}}}}}", secret.secret, secret.field));
                }
                Fragment::Attr {
                    resource,
                    attribute,
                } => {
                    out.push_str(&format!("{{{{attr:{resource}.{attribute}}}}}"));
                }
            }
        }
        out
    }

    /// Resolve the value. Only call this at apply time.
    pub fn resolve(&self, resolver: &dyn ValueResolver) -> Result<SecretString, ResolveError> {
        use secrecy::ExposeSecret;

        let mut out = String::new();
        for fragment in &self.fragments {
            match fragment {
                Fragment::Text { value } => out.push_str(value),
                Fragment::Secret { secret } => {
                    out.push_str(resolver.secret(secret)?.expose_secret());
                }
                Fragment::Attr {
                    resource,
                    attribute,
                } => out.push_str(&resolver.attribute(resource, attribute)?),
            }
        }
        Ok(SecretString::from(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    struct Fixed;

    impl ValueResolver for Fixed {
        fn secret(&self, reference: &SecretRef) -> Result<SecretString, ResolveError> {
            match reference.field.as_str() {
                "password" => Ok(SecretString::from("hunter2".to_string())),
                other => Err(ResolveError::UnknownSecretField {
                    secret: reference.secret.to_string(),
                    field: other.to_string(),
                }),
            }
        }

        fn attribute(&self, _: &ResourceId, attribute: &str) -> Result<String, ResolveError> {
            Ok(format!("<{attribute}>"))
        }
    }

    fn secret_id() -> ResourceId {
        ResourceId::new("db", "secret")
    }

    #[test]
    fn redacted_never_contains_secret_material() {
        let value = EnvValue::literal("pw=").secret(SecretRef::new(&secret_id(), "password"));
        let shown = value.redacted();
        assert_eq!(shown, "pw={{secret:db/secret#password}}");
        assert!(!shown.contains("hunter2"));
        assert!(value.is_sensitive());
    }

    #[test]
    fn resolves_all_fragment_kinds() {
        let value = EnvValue::literal("a:")
            .secret(SecretRef::new(&secret_id(), "password"))
            .text("@")
            .attr(&ResourceId::new("db", "cluster"), "endpoint.host");
        let resolved = value.resolve(&Fixed).unwrap();
        assert_eq!(resolved.expose_secret(), "a:hunter2@<endpoint.host>");
    }

    #[test]
    fn resolve_propagates_unknown_field() {
        let value = EnvValue::default().secret(SecretRef::new(&secret_id(), "token"));
        let err = value.resolve(&Fixed).unwrap_err();
        assert!(matches!(err, ResolveError::UnknownSecretField { .. }));
    }

    #[test]
    fn adjacent_text_is_merged() {
        let a = EnvValue::literal("ab");
        let b = EnvValue::literal("a").text("b");
        assert_eq!(a, b);
        assert_eq!(a.fragments().len(), 1);
    }

    #[test]
    fn references_list_secret_and_attr_sources() {
        let cluster = ResourceId::new("db", "cluster");
        let value = EnvValue::default()
            .secret(SecretRef::new(&secret_id(), "username"))
            .attr(&cluster, "endpoint.port");
        let refs: Vec<_> = value.references().collect();
        assert_eq!(refs, vec![&secret_id(), &cluster]);
    }
}
