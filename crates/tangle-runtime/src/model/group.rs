#![forbid(unsafe_code)]

//! Named, recursive collections of models.
//!
//! A [`ModelGroup`] holds an ordered, frozen set of fields, each either a
//! model or a nested group. Validating a group validates every field
//! depth-first and ANDs the results, then runs the optional group validator
//! over the assembled JSON payload. The group validator addresses models by
//! dot path (`"address.zip"`).
//!
//! # Notification batching
//!
//! Every model touched during one top-level `validate` stores its errors
//! silently and enlists its error cell in a thread-wide pass owned by the
//! eldest validating group. Nested groups, and groups validated re-entrantly
//! from a validator, join that pass. When the eldest finishes, each distinct
//! error cell is notified exactly once, however deep the nesting.
//!
//! # Invariants
//!
//! 1. Field names are non-empty, contain no `.` and are unique.
//! 2. The field set never changes after construction.
//! 3. One `validate` call notifies each leaf error cell exactly once.
//! 4. Re-validating unchanged values does not rerun model validators, and
//!    errors added by a group validator do not accumulate across calls.

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use serde_json::{Map, Value};

use crate::entangled::Entangled;
use crate::error::{Error, Result};

use super::batch;
use super::validation::ValidationAbort;
use super::{Model, ModelOps, ModelValue};

// ---------------------------------------------------------------------------
// Fields
// ---------------------------------------------------------------------------

/// A type-erased [`Model`].
#[derive(Clone)]
pub struct AnyModel {
    ops: Rc<dyn ModelOps>,
    any: Rc<dyn Any>,
}

impl AnyModel {
    /// The typed model, if it holds a `T`.
    #[must_use]
    pub fn downcast<T: ModelValue>(&self) -> Option<Model<T>> {
        Model::from_any(Rc::clone(&self.any))
    }

    /// Validate with default flags.
    pub fn validate(&self) -> bool {
        self.ops.validate_with(false, true)
    }

    #[must_use]
    pub fn errors(&self) -> Vec<String> {
        self.ops.errors()
    }

    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.ops.has_errors()
    }

    pub fn payload(&self) -> Result<Value> {
        self.ops.payload()
    }

    fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.any, &other.any)
    }
}

impl<T: ModelValue> From<Model<T>> for AnyModel {
    fn from(model: Model<T>) -> Self {
        Self {
            ops: model.ops(),
            any: model.as_any(),
        }
    }
}

impl<T: ModelValue> From<&Model<T>> for AnyModel {
    fn from(model: &Model<T>) -> Self {
        Self::from(model.clone())
    }
}

impl fmt::Debug for AnyModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnyModel")
            .field("errors", &self.errors())
            .finish_non_exhaustive()
    }
}

/// One entry of a [`ModelGroup`].
#[derive(Clone, Debug)]
pub enum Field {
    Model(AnyModel),
    Group(ModelGroup),
}

impl Field {
    #[must_use]
    pub fn is_group(&self) -> bool {
        matches!(self, Self::Group(_))
    }

    #[must_use]
    pub fn as_model(&self) -> Option<&AnyModel> {
        match self {
            Self::Model(model) => Some(model),
            Self::Group(_) => None,
        }
    }

    #[must_use]
    pub fn as_group(&self) -> Option<&ModelGroup> {
        match self {
            Self::Group(group) => Some(group),
            Self::Model(_) => None,
        }
    }

    /// The model's errors; empty for groups.
    #[must_use]
    pub fn errors(&self) -> Vec<String> {
        match self {
            Self::Model(model) => model.errors(),
            Self::Group(_) => Vec::new(),
        }
    }

    #[must_use]
    pub fn has_errors(&self) -> bool {
        match self {
            Self::Model(model) => model.has_errors(),
            Self::Group(group) => group.has_errors(),
        }
    }

    fn payload(&self) -> Result<Value> {
        match self {
            Self::Model(model) => model.payload(),
            Self::Group(group) => group.payload(),
        }
    }

    fn reset(&self) {
        match self {
            Self::Model(model) => model.ops.reset(),
            Self::Group(group) => group.reset(),
        }
    }

    fn clear(&self) {
        match self {
            Self::Model(model) => model.ops.clear(),
            Self::Group(group) => group.clear(),
        }
    }

    fn dispose(&self) {
        match self {
            Self::Model(model) => model.ops.dispose(),
            Self::Group(group) => group.dispose(),
        }
    }
}

/// Fields compare by identity.
impl PartialEq for Field {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Model(a), Self::Model(b)) => a.ptr_eq(b),
            (Self::Group(a), Self::Group(b)) => Rc::ptr_eq(&a.inner, &b.inner),
            _ => false,
        }
    }
}

impl<T: ModelValue> From<Model<T>> for Field {
    fn from(model: Model<T>) -> Self {
        Self::Model(model.into())
    }
}

impl<T: ModelValue> From<&Model<T>> for Field {
    fn from(model: &Model<T>) -> Self {
        Self::Model(model.into())
    }
}

impl From<ModelGroup> for Field {
    fn from(group: ModelGroup) -> Self {
        Self::Group(group)
    }
}

impl From<&ModelGroup> for Field {
    fn from(group: &ModelGroup) -> Self {
        Self::Group(group.clone())
    }
}

/// Verdict of a [`ModelGroup::for_errors`] filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterAction {
    /// Leave this field (and its subtree) out.
    Skip,
    /// Take this field; keep filtering inside it.
    Accept,
    /// Take this field and its direct models, without descending further.
    AcceptChildren,
    /// Take the whole subtree without consulting the filter again.
    AcceptDescendants,
}

// ---------------------------------------------------------------------------
// Group validator
// ---------------------------------------------------------------------------

/// A group validator: sees the group payload and reports errors by path.
pub type GroupValidator =
    Rc<dyn Fn(&Value, &mut GroupValidation<'_>) -> std::result::Result<(), ValidationAbort>>;

/// Error sink handed to a [`GroupValidator`].
pub struct GroupValidation<'a> {
    group: &'a ModelGroup,
    reported: usize,
    failed: bool,
}

impl GroupValidation<'_> {
    /// Attach `message` to the model at dot path `path`.
    ///
    /// The group fails either way; a path that does not name a model is
    /// logged and the message dropped.
    pub fn error(&mut self, path: &str, message: impl Into<String>) {
        self.failed = true;
        match self.group.field(path) {
            Some(Field::Model(model)) => {
                model.ops.push_error(message.into());
                self.reported += 1;
            }
            Some(Field::Group(_)) => {
                tracing::warn!(path, "group validator error targets a group; message dropped");
            }
            None => {
                tracing::warn!(path, "group validator error targets an unknown field; message dropped");
            }
        }
    }

    /// Stop here if anything has been reported.
    pub fn checkpoint(&self) -> std::result::Result<(), ValidationAbort> {
        if self.failed {
            Err(ValidationAbort)
        } else {
            Ok(())
        }
    }

    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.failed
    }

    /// Messages delivered to models so far.
    #[must_use]
    pub fn reported(&self) -> usize {
        self.reported
    }
}

/// Result of [`ModelGroup::validate_with_payload`].
#[derive(Debug, Clone, PartialEq)]
pub struct GroupValidated {
    pub valid: bool,
    pub payload: Value,
}

// ---------------------------------------------------------------------------
// ModelGroup
// ---------------------------------------------------------------------------

struct GroupInner {
    fields: Entangled,
    validator: Option<GroupValidator>,
}

/// A named, recursive collection of models and groups.
///
/// Cloning yields another handle to the same group.
#[derive(Clone)]
pub struct ModelGroup {
    inner: Rc<GroupInner>,
}

/// Build a group without a group validator.
pub fn use_model_group<K, I>(fields: I) -> Result<ModelGroup>
where
    K: Into<String>,
    I: IntoIterator<Item = (K, Field)>,
{
    fields
        .into_iter()
        .fold(ModelGroup::builder(), |builder, (name, field)| {
            builder.field(name, field)
        })
        .build()
}

impl ModelGroup {
    #[must_use]
    pub fn builder() -> ModelGroupBuilder {
        ModelGroupBuilder {
            fields: Entangled::new(),
            validator: None,
            error: None,
        }
    }

    /// Fields in definition order.
    #[must_use]
    pub fn fields(&self) -> Vec<(String, Field)> {
        self.inner.fields.values::<Field>()
    }

    /// Field names in definition order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.inner.fields.keys()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.fields.is_empty()
    }

    /// Resolve a dot path.
    #[must_use]
    pub fn field(&self, path: &str) -> Option<Field> {
        let (head, rest) = match path.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (path, None),
        };
        let field = self.inner.fields.get::<Field>(head).ok()?;
        match (rest, field) {
            (None, field) => Some(field),
            (Some(rest), Field::Group(group)) => group.field(rest),
            (Some(_), Field::Model(_)) => None,
        }
    }

    /// The model at `path`, if it holds a `T`.
    #[must_use]
    pub fn model<T: ModelValue>(&self, path: &str) -> Option<Model<T>> {
        self.field(path)?.as_model()?.downcast()
    }

    /// The group at `path`.
    #[must_use]
    pub fn group(&self, path: &str) -> Option<ModelGroup> {
        self.field(path)?.as_group().cloned()
    }

    /// Validate every field, then the group validator.
    pub fn validate(&self) -> bool {
        self.run(false).0
    }

    /// [`validate`](Self::validate), also returning the payload that was
    /// validated.
    pub fn validate_with_payload(&self) -> Result<GroupValidated> {
        let (valid, payload) = self.run(true);
        let payload = payload.unwrap_or_else(|| self.payload())?;
        Ok(GroupValidated { valid, payload })
    }

    fn run(&self, want_payload: bool) -> (bool, Option<Result<Value>>) {
        let pass = batch::begin();
        let span = tracing::debug_span!(
            "model_group.validate",
            fields = self.len(),
            eldest = pass.is_eldest()
        );
        let _enter = span.enter();

        let mut valid = true;
        for (_, field) in self.fields() {
            let ok = match &field {
                Field::Model(model) => model.ops.validate_in_pass(),
                Field::Group(group) => group.validate(),
            };
            valid &= ok;
        }

        let payload = (want_payload || self.inner.validator.is_some()).then(|| self.payload());
        if let Some(validator) = &self.inner.validator {
            match &payload {
                Some(Ok(value)) => valid &= self.run_validator(validator, value),
                Some(Err(err)) => {
                    tracing::warn!(%err, "group payload unavailable; group validator skipped");
                    valid = false;
                }
                None => {}
            }
        }

        let notified = pass.finish();
        tracing::debug!(valid, notified, "model group validated");
        (valid, payload)
    }

    fn run_validator(&self, validator: &GroupValidator, payload: &Value) -> bool {
        let mut validation = GroupValidation {
            group: self,
            reported: 0,
            failed: false,
        };
        if validator(payload, &mut validation).is_err() {
            tracing::trace!(
                reported = validation.reported,
                "group validator stopped at checkpoint"
            );
        }
        !validation.failed
    }

    /// Raw values keyed by field name, recursively.
    pub fn payload(&self) -> Result<Value> {
        let mut map = Map::new();
        for (name, field) in self.fields() {
            map.insert(name, field.payload()?);
        }
        Ok(Value::Object(map))
    }

    /// Whether any model in the tree has errors.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.fields().iter().any(|(_, field)| field.has_errors())
    }

    /// Reset every model in the tree.
    pub fn reset(&self) {
        for (_, field) in self.fields() {
            field.reset();
        }
    }

    /// Clear every model in the tree.
    pub fn clear(&self) {
        for (_, field) in self.fields() {
            field.clear();
        }
    }

    /// Dispose every model in the tree.
    pub fn dispose(&self) {
        for (_, field) in self.fields() {
            field.dispose();
        }
    }

    /// Visit models with errors, depth-first, as `(path, errors)`.
    ///
    /// `filter` sees each field as `(path, field)` and decides whether and
    /// how to descend.
    pub fn for_errors(
        &self,
        mut callback: impl FnMut(&str, &[String]),
        filter: impl Fn(&str, &Field) -> FilterAction,
    ) {
        self.walk("", &mut callback, Some(&filter));
    }

    /// Visit every model with errors.
    pub fn for_each_error(&self, mut callback: impl FnMut(&str, &[String])) {
        self.walk("", &mut callback, None);
    }

    fn walk(
        &self,
        prefix: &str,
        callback: &mut dyn FnMut(&str, &[String]),
        filter: Option<&dyn Fn(&str, &Field) -> FilterAction>,
    ) {
        for (name, field) in self.fields() {
            let path = join(prefix, &name);
            let action = filter.map_or(FilterAction::AcceptDescendants, |f| f(&path, &field));
            match (action, &field) {
                (FilterAction::Skip, _) => {}
                (_, Field::Model(model)) => emit(&path, model, callback),
                (FilterAction::Accept, Field::Group(group)) => group.walk(&path, callback, filter),
                (FilterAction::AcceptDescendants, Field::Group(group)) => {
                    group.walk(&path, callback, None);
                }
                (FilterAction::AcceptChildren, Field::Group(group)) => {
                    for (child, field) in group.fields() {
                        if let Field::Model(model) = &field {
                            emit(&join(&path, &child), model, callback);
                        }
                    }
                }
            }
        }
    }
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_owned()
    } else {
        format!("{prefix}.{name}")
    }
}

fn emit(path: &str, model: &AnyModel, callback: &mut dyn FnMut(&str, &[String])) {
    let errors = model.errors();
    if !errors.is_empty() {
        callback(path, &errors);
    }
}

impl fmt::Debug for ModelGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelGroup")
            .field("fields", &self.names().collect::<Vec<_>>())
            .field("validator", &self.inner.validator.is_some())
            .finish()
    }
}

/// Builder for [`ModelGroup`]. The first naming error is reported by
/// [`build`](Self::build).
pub struct ModelGroupBuilder {
    fields: Entangled,
    validator: Option<GroupValidator>,
    error: Option<Error>,
}

impl ModelGroupBuilder {
    #[must_use]
    pub fn model<T: ModelValue>(self, name: impl Into<String>, model: &Model<T>) -> Self {
        self.field(name, model.into())
    }

    #[must_use]
    pub fn group(self, name: impl Into<String>, group: &ModelGroup) -> Self {
        self.field(name, group.into())
    }

    #[must_use]
    pub fn field(mut self, name: impl Into<String>, field: Field) -> Self {
        if self.error.is_some() {
            return self;
        }
        let name = name.into();
        if let Err(err) = self.add(name, field) {
            self.error = Some(err);
        }
        self
    }

    fn add(&mut self, name: String, field: Field) -> Result<()> {
        if name.is_empty() {
            return Err(Error::InvalidField {
                name,
                reason: "field names must not be empty",
            });
        }
        if name.contains('.') {
            return Err(Error::InvalidField {
                name,
                reason: "field names must not contain '.'",
            });
        }
        if self.fields.contains(&name) {
            return Err(Error::DuplicateField { name });
        }
        self.fields.define_value(name, field)
    }

    #[must_use]
    pub fn validator(
        mut self,
        validator: impl Fn(&Value, &mut GroupValidation<'_>) -> std::result::Result<(), ValidationAbort>
        + 'static,
    ) -> Self {
        self.validator = Some(Rc::new(validator));
        self
    }

    pub fn build(self) -> Result<ModelGroup> {
        if let Some(err) = self.error {
            return Err(err);
        }
        let mut fields = self.fields;
        fields.freeze();
        Ok(ModelGroup {
            inner: Rc::new(GroupInner {
                fields,
                validator: self.validator,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Subscription;
    use std::cell::{Cell, RefCell};

    fn counter(model: &Model<String>) -> (Rc<Cell<u32>>, Subscription) {
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        (hits, model.errors_cell().subscribe(move |_| h.set(h.get() + 1)))
    }

    fn required(value: &String, v: &mut crate::model::Validation) -> std::result::Result<(), ValidationAbort> {
        if value.is_empty() {
            v.error("required");
        }
        Ok(())
    }

    #[test]
    fn group_validator_reports_by_path() {
        let a = Model::new(String::new());
        let b = Model::new(String::new());
        let group = ModelGroup::builder()
            .model("a", &a)
            .model("b", &b)
            .validator(|payload, errors| {
                if payload["a"].as_str().is_none_or(str::is_empty) {
                    errors.error("a", "required");
                }
                Ok(())
            })
            .build()
            .unwrap();
        let (hits_a, _sa) = counter(&a);
        let (hits_b, _sb) = counter(&b);

        assert!(!group.validate());
        assert_eq!(a.errors(), vec!["required".to_string()]);
        assert!(b.errors().is_empty());
        assert_eq!((hits_a.get(), hits_b.get()), (1, 1));

        assert!(!group.validate());
        assert_eq!(a.errors(), vec!["required".to_string()]);
        assert_eq!(a.validator_runs(), 1);
    }

    #[test]
    fn standalone_validate_honours_group_errors() {
        let a = Model::new(String::new());
        let group = ModelGroup::builder()
            .model("a", &a)
            .validator(|_, errors| {
                errors.error("a", "required");
                Ok(())
            })
            .build()
            .unwrap();

        assert!(!group.validate());
        assert!(!a.validate());
        assert_eq!(a.errors(), vec!["required".to_string()]);
        assert!(!a.is_valid());
        assert_eq!(a.validator_runs(), 1);

        assert!(a.force_validate());
        assert!(a.errors().is_empty());
        assert!(a.validate());
    }

    #[test]
    fn nested_groups_notify_each_leaf_once() {
        let x = Model::new(0);
        let z = Model::builder(String::new()).validator(required).build();
        let inner = ModelGroup::builder().model("z", &z).build().unwrap();
        let outer = ModelGroup::builder()
            .model("x", &x)
            .group("y", &inner)
            .build()
            .unwrap();

        let x_hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&x_hits);
        let _sx = x.errors_cell().subscribe(move |_| h.set(h.get() + 1));
        let (z_hits, _sz) = counter(&z);

        assert!(!outer.validate());
        assert_eq!(x_hits.get(), 1);
        assert_eq!(z_hits.get(), 1);
        assert!(!crate::model::batch::is_active());
    }

    #[test]
    fn payload_is_recursive() {
        let inner = use_model_group([("zip", Field::from(Model::new("12345".to_string())))]).unwrap();
        let outer = ModelGroup::builder()
            .model("age", &Model::new(42))
            .group("address", &inner)
            .build()
            .unwrap();
        assert_eq!(
            outer.payload().unwrap(),
            serde_json::json!({ "age": 42, "address": { "zip": "12345" } })
        );
        let validated = outer.validate_with_payload().unwrap();
        assert!(validated.valid);
        assert_eq!(validated.payload["address"]["zip"], "12345");
    }

    #[test]
    fn paths_resolve_through_groups() {
        let zip = Model::new(String::from("1"));
        let inner = ModelGroup::builder().model("zip", &zip).build().unwrap();
        let outer = ModelGroup::builder().group("address", &inner).build().unwrap();

        let found: Model<String> = outer.model("address.zip").unwrap();
        assert!(found.value_cell().ptr_eq(zip.value_cell()));
        assert!(outer.model::<i32>("address.zip").is_none());
        assert!(outer.group("address").is_some());
        assert!(outer.field("address.zip.deeper").is_none());
        assert!(outer.field("missing").is_none());
    }

    #[test]
    fn unknown_error_path_fails_group_without_panicking() {
        let a = Model::new(1);
        let group = ModelGroup::builder()
            .model("a", &a)
            .validator(|_, errors| {
                errors.error("nope", "bad");
                Ok(())
            })
            .build()
            .unwrap();
        assert!(!group.validate());
        assert!(a.errors().is_empty());
    }

    #[test]
    fn builder_rejects_bad_names() {
        let m = Model::new(0);
        assert!(matches!(
            ModelGroup::builder().model("", &m).build(),
            Err(Error::InvalidField { .. })
        ));
        assert!(matches!(
            ModelGroup::builder().model("a.b", &m).build(),
            Err(Error::InvalidField { .. })
        ));
        assert!(matches!(
            ModelGroup::builder().model("a", &m).model("a", &m).build(),
            Err(Error::DuplicateField { .. })
        ));
    }

    #[test]
    fn reset_and_clear_recurse() {
        let a = Model::builder(String::from("init")).validator(required).build();
        let inner = ModelGroup::builder().model("a", &a).build().unwrap();
        let outer = ModelGroup::builder().group("inner", &inner).build().unwrap();

        a.set(String::new());
        outer.validate();
        assert!(outer.has_errors());
        outer.clear();
        assert!(!outer.has_errors());
        outer.reset();
        assert_eq!(a.value(), "init");
    }

    fn tree() -> (ModelGroup, Model<String>, Model<String>, Model<String>) {
        let top = Model::builder(String::new()).validator(required).build();
        let mid = Model::builder(String::new()).validator(required).build();
        let deep = Model::builder(String::new()).validator(required).build();
        let leaf = ModelGroup::builder().model("deep", &deep).build().unwrap();
        let branch = ModelGroup::builder()
            .model("mid", &mid)
            .group("leaf", &leaf)
            .build()
            .unwrap();
        let root = ModelGroup::builder()
            .model("top", &top)
            .group("branch", &branch)
            .build()
            .unwrap();
        root.validate();
        (root, top, mid, deep)
    }

    fn collect(group: &ModelGroup, filter: impl Fn(&str, &Field) -> FilterAction) -> Vec<String> {
        let paths = RefCell::new(Vec::new());
        group.for_errors(|path, _| paths.borrow_mut().push(path.to_owned()), filter);
        paths.into_inner()
    }

    #[test]
    fn for_errors_filter_actions() {
        let (root, ..) = tree();
        let mut all = Vec::new();
        root.for_each_error(|path, errors| {
            assert_eq!(errors, ["required".to_string()]);
            all.push(path.to_owned());
        });
        assert_eq!(all, vec!["top", "branch.mid", "branch.leaf.deep"]);

        let skip_branch = collect(&root, |path, _| {
            if path == "branch" {
                FilterAction::Skip
            } else {
                FilterAction::Accept
            }
        });
        assert_eq!(skip_branch, vec!["top"]);

        let children = collect(&root, |path, field| match (path, field.is_group()) {
            ("branch", true) => FilterAction::AcceptChildren,
            (_, true) => FilterAction::Accept,
            _ => FilterAction::Skip,
        });
        assert_eq!(children, vec!["branch.mid"]);

        let descendants = collect(&root, |path, _| {
            if path == "branch" {
                FilterAction::AcceptDescendants
            } else {
                FilterAction::Skip
            }
        });
        assert_eq!(descendants, vec!["branch.mid", "branch.leaf.deep"]);
    }
}
