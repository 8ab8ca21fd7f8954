//! Shallow settings merge.
//!
//! A child (narrow scope) value overrides its parent (coarse scope) field by
//! field. A child field that is unset (`None`, empty string, empty
//! collection, numeric zero, `false`) falls back to the parent's field.
//! Nested structs are replaced wholesale, never merged recursively. An
//! explicit zero value in the child therefore cannot override the parent.

use std::borrow::Cow;

use crate::domain::{CsrfPolicy, ExtProcSettings};

/// Whether a field counts as "not specified" for merging.
pub trait Unset {
    fn is_unset(&self) -> bool;
}

impl<T> Unset for Option<T> {
    fn is_unset(&self) -> bool {
        self.is_none()
    }
}

impl<T> Unset for Vec<T> {
    fn is_unset(&self) -> bool {
        self.is_empty()
    }
}

impl Unset for String {
    fn is_unset(&self) -> bool {
        self.is_empty()
    }
}

impl Unset for bool {
    fn is_unset(&self) -> bool {
        !*self
    }
}

macro_rules! numeric_unset {
    ($($ty:ty),*) => {
        $(impl Unset for $ty {
            fn is_unset(&self) -> bool {
                *self == 0
            }
        })*
    };
}

numeric_unset!(u32, u64, i32, i64);

/// Child's value unless it is unset.
pub fn pick<T: Unset + Clone>(child: &T, parent: &T) -> T {
    if child.is_unset() {
        parent.clone()
    } else {
        child.clone()
    }
}

/// Per-type field merge used by [`shallow_merge`].
pub trait ShallowMerge: Clone {
    fn merge_fields(parent: &Self, child: &Self) -> Self;
}

/// Implements [`ShallowMerge`] by picking every listed field. The struct
/// literal has no `..` so adding a field without listing it fails to compile.
macro_rules! impl_shallow_merge {
    ($ty:ty { $($field:ident),* $(,)? }) => {
        impl ShallowMerge for $ty {
            fn merge_fields(parent: &Self, child: &Self) -> Self {
                Self {
                    $($field: pick(&child.$field, &parent.$field),)*
                }
            }
        }
    };
}

impl_shallow_merge!(ExtProcSettings {
    grpc_service,
    filter_stage,
    failure_mode_allow,
    processing_mode,
    request_attributes,
    response_attributes,
    message_timeout,
    max_message_timeout,
    stat_prefix,
    metadata_context_namespaces,
    typed_metadata_context_namespaces,
    mutation_rules,
    disable_clear_route_cache,
    forward_rules,
    filter_metadata,
    allow_mode_override,
});

impl_shallow_merge!(CsrfPolicy { filter_enabled, shadow_enabled, additional_origins });

/// Effective settings for a scope.
///
/// A single present side is returned borrowed, so the parent is aliased
/// rather than copied when the child is absent.
pub fn shallow_merge<'a, T: ShallowMerge>(
    parent: Option<&'a T>,
    child: Option<&'a T>,
) -> Option<Cow<'a, T>> {
    match (parent, child) {
        (None, None) => None,
        (Some(parent), None) => Some(Cow::Borrowed(parent)),
        (None, Some(child)) => Some(Cow::Borrowed(child)),
        (Some(parent), Some(child)) => Some(Cow::Owned(T::merge_fields(parent, child))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DurationSpec, ExtProcGrpcService, HeaderValue, ResourceRef};
    use proptest::prelude::*;

    fn parent() -> ExtProcSettings {
        ExtProcSettings {
            failure_mode_allow: Some(true),
            message_timeout: Some(DurationSpec::seconds(1)),
            request_attributes: vec!["parent".into()],
            stat_prefix: "global".into(),
            ..Default::default()
        }
    }

    #[test]
    fn child_fields_win_unless_unset() {
        let child = ExtProcSettings {
            message_timeout: None,
            request_attributes: vec!["a".into()],
            ..Default::default()
        };

        let parent = parent();
        let merged = shallow_merge(Some(&parent), Some(&child)).expect("merged");
        assert_eq!(merged.failure_mode_allow, Some(true));
        assert_eq!(merged.message_timeout, Some(DurationSpec::seconds(1)));
        assert_eq!(merged.request_attributes, vec!["a".to_string()]);
        assert_eq!(merged.stat_prefix, "global");
    }

    #[test]
    fn absent_side_is_aliased() {
        let parent = parent();
        let merged = shallow_merge(Some(&parent), None).expect("parent");
        assert!(matches!(merged, Cow::Borrowed(p) if std::ptr::eq(p, &parent)));

        let child = ExtProcSettings { stat_prefix: "child".into(), ..Default::default() };
        let merged = shallow_merge(None, Some(&child)).expect("child");
        assert!(matches!(merged, Cow::Borrowed(c) if std::ptr::eq(c, &child)));

        assert!(shallow_merge::<ExtProcSettings>(None, None).is_none());
    }

    #[test]
    fn nested_struct_is_replaced_wholesale() {
        let parent = ExtProcSettings {
            grpc_service: Some(ExtProcGrpcService {
                ext_proc_server_ref: ResourceRef::new("gloo-system", "global"),
                authority: Some("xyz".into()),
                initial_metadata: vec![HeaderValue::new("A", "B")],
                ..Default::default()
            }),
            ..Default::default()
        };
        let child = ExtProcSettings {
            grpc_service: Some(ExtProcGrpcService {
                ext_proc_server_ref: ResourceRef::new("gloo-system", "override"),
                ..Default::default()
            }),
            ..Default::default()
        };

        let merged = shallow_merge(Some(&parent), Some(&child)).expect("merged");
        let service = merged.grpc_service.as_ref().expect("service");
        assert_eq!(service.ext_proc_server_ref.name, "override");
        assert_eq!(service.authority, None);
        assert!(service.initial_metadata.is_empty());
    }

    #[test]
    fn explicit_false_wrapper_still_overrides() {
        let child = ExtProcSettings { failure_mode_allow: Some(false), ..Default::default() };
        let parent = parent();
        let merged = shallow_merge(Some(&parent), Some(&child)).expect("merged");
        assert_eq!(merged.failure_mode_allow, Some(false));
    }

    #[test]
    fn scalar_zero_values_fall_back() {
        assert_eq!(pick(&0u32, &7u32), 7);
        assert_eq!(pick(&3i64, &7i64), 3);
        assert!(pick(&false, &true));
        assert_eq!(pick(&String::new(), &"p".to_string()), "p");
    }

    proptest! {
        #[test]
        fn merge_precedence_holds_per_field(
            p_fma in proptest::option::of(any::<bool>()),
            c_fma in proptest::option::of(any::<bool>()),
            p_attrs in prop::collection::vec("[a-z]{1,4}", 0..3),
            c_attrs in prop::collection::vec("[a-z]{1,4}", 0..3),
            p_prefix in "[a-z]{0,3}",
            c_prefix in "[a-z]{0,3}",
            p_timeout in proptest::option::of(0i64..3600),
            c_timeout in proptest::option::of(0i64..3600),
        ) {
            let parent = ExtProcSettings {
                failure_mode_allow: p_fma,
                request_attributes: p_attrs.clone(),
                stat_prefix: p_prefix.clone(),
                message_timeout: p_timeout.map(DurationSpec::seconds),
                ..Default::default()
            };
            let child = ExtProcSettings {
                failure_mode_allow: c_fma,
                request_attributes: c_attrs.clone(),
                stat_prefix: c_prefix.clone(),
                message_timeout: c_timeout.map(DurationSpec::seconds),
                ..Default::default()
            };

            let merged = ExtProcSettings::merge_fields(&parent, &child);
            prop_assert_eq!(merged.failure_mode_allow, c_fma.or(p_fma));
            prop_assert_eq!(&merged.request_attributes, if c_attrs.is_empty() { &p_attrs } else { &c_attrs });
            prop_assert_eq!(&merged.stat_prefix, if c_prefix.is_empty() { &p_prefix } else { &c_prefix });
            prop_assert_eq!(merged.message_timeout, c_timeout.or(p_timeout).map(DurationSpec::seconds));
        }
    }
}
