//! Box algebra for scenario discovery
//!
//! A [`ParameterBox`] is a hyper-rectangle over a scope's parameter space: one
//! [`Bounds`] per constrained dimension, every other dimension open.
//! [`Boxes`] is a named set of boxes, [`ChainedBox`] a refinement forest.
//!
//! All operations are pure and return new values, so boxes can be shared
//! across threads and analyses freely.
//!
//! ```rust
//! use trueno_ema::boxes::ParameterBox;
//! use trueno_ema::bounds::Bounds;
//! use trueno_ema::value::assignment;
//!
//! let low_x = ParameterBox::new("low-x")
//!     .with_bounds(Bounds::continuous("x", 0.0, 5.0)?)?;
//!
//! assert!(low_x.contains(&assignment([("x", 3.0.into()), ("y", "lo".into())])));
//! assert!(!low_x.contains(&assignment([("x", 8.0.into())])));
//! # Ok::<(), trueno_ema::Error>(())
//! ```

mod chained;

pub use chained::{ChainNode, ChainedBox, NodeId};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::bounds::{Bounds, BoundsKind};
use crate::scope::Scope;
use crate::value::Assignment;
use crate::{Error, Result};

/// Named hyper-box: constrained dimensions only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawBox")]
pub struct ParameterBox {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    scope: Option<String>,
    bounds: BTreeMap<String, Bounds>,
}

#[derive(Deserialize)]
struct RawBox {
    name: String,
    #[serde(default)]
    scope: Option<String>,
    bounds: BTreeMap<String, Bounds>,
}

impl TryFrom<RawBox> for ParameterBox {
    type Error = Error;

    fn try_from(raw: RawBox) -> Result<Self> {
        let mut bx = Self::new(raw.name);
        for (dimension, bounds) in raw.bounds {
            if dimension != bounds.name() {
                return Err(Error::format(format!(
                    "box '{}' files bounds of '{}' under '{dimension}'",
                    bx.name,
                    bounds.name()
                )));
            }
            bx = bx.with_bounds(bounds)?;
        }
        bx.scope = raw.scope;
        Ok(bx)
    }
}

impl ParameterBox {
    /// Unrestricted box.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scope: None,
            bounds: BTreeMap::new(),
        }
    }

    /// Attach the box to a scope after checking its dimensions.
    ///
    /// # Errors
    ///
    /// See [`ParameterBox::validate`].
    pub fn for_scope(mut self, scope: &Scope) -> Result<Self> {
        self.validate(scope)?;
        self.scope = Some(scope.name().to_string());
        Ok(self)
    }

    /// Add a constraint. A dimension given twice keeps the intersection.
    ///
    /// # Errors
    ///
    /// `ScopeFormat` if a repeated dimension has an inconsistent kind or no
    /// overlap with its earlier bounds.
    pub fn with_bounds(mut self, bounds: Bounds) -> Result<Self> {
        let merged = match self.bounds.get(bounds.name()) {
            Some(existing) => existing.intersect(&bounds)?.ok_or_else(|| {
                Error::format(format!(
                    "box '{}' constrains '{}' twice without overlap",
                    self.name,
                    bounds.name()
                ))
            })?,
            None => bounds,
        };
        if !merged.is_unrestricted() {
            self.bounds.insert(merged.name().to_string(), merged);
        }
        Ok(self)
    }

    /// Box name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Scope this box was validated against, if any.
    #[must_use]
    pub fn scope_name(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    /// Copy under a different name.
    #[must_use]
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }

    /// Constraint on `dimension`, if any.
    #[must_use]
    pub fn bounds(&self, dimension: &str) -> Option<&Bounds> {
        self.bounds.get(dimension)
    }

    /// Constrained dimensions in name order.
    pub fn dimensions(&self) -> impl Iterator<Item = &str> {
        self.bounds.keys().map(String::as_str)
    }

    /// All constraints in name order.
    pub fn iter(&self) -> impl Iterator<Item = &Bounds> {
        self.bounds.values()
    }

    /// Number of constrained dimensions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bounds.len()
    }

    /// True when no dimension is constrained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bounds.is_empty()
    }

    /// Point membership: every constrained dimension must pass.
    #[must_use]
    pub fn contains(&self, point: &Assignment) -> bool {
        self.bounds
            .values()
            .all(|bounds| bounds.admits(point.get(bounds.name())))
    }

    /// Narrow one dimension. `Ok(None)` if the result is empty.
    ///
    /// # Errors
    ///
    /// `ScopeFormat` for an inconsistent kind.
    pub fn restrict(&self, bounds: &Bounds) -> Result<Option<Self>> {
        let narrowed = match self.bounds.get(bounds.name()) {
            Some(existing) => match existing.intersect(bounds)? {
                Some(b) => b,
                None => return Ok(None),
            },
            None => bounds.clone(),
        };
        let mut out = self.clone();
        if !narrowed.is_unrestricted() {
            out.bounds.insert(narrowed.name().to_string(), narrowed);
        }
        Ok(Some(out))
    }

    /// Dimension-wise intersection with another box. `Ok(None)` if any
    /// dimension ends up empty.
    ///
    /// # Errors
    ///
    /// `ScopeFormat` for an inconsistent kind on a shared dimension.
    pub fn intersect(&self, other: &Self, name: impl Into<String>) -> Result<Option<Self>> {
        let mut out = self.renamed(name);
        for bounds in other.bounds.values() {
            match out.restrict(bounds)? {
                Some(next) => out = next,
                None => return Ok(None),
            }
        }
        Ok(Some(out))
    }

    /// Check dimensions against a scope.
    ///
    /// # Errors
    ///
    /// `Scope` for an undeclared dimension, `ScopeFormat` when a dimension's
    /// kind differs from the declared domain.
    pub fn validate(&self, scope: &Scope) -> Result<()> {
        for bounds in self.bounds.values() {
            let declared = scope.domain_of(bounds.name()).map_err(|_| {
                Error::scope(format!(
                    "box '{}' constrains '{}', which scope '{}' does not declare",
                    self.name,
                    bounds.name(),
                    scope.name()
                ))
            })?;
            let kind = declared.kind();
            if kind != BoundsKind::Unrestricted && kind != bounds.kind() {
                return Err(Error::format(format!(
                    "box '{}' constrains '{}' as {}, scope declares {}",
                    self.name,
                    bounds.name(),
                    bounds.kind(),
                    kind
                )));
            }
        }
        Ok(())
    }
}

/// Unordered named set of boxes sharing one scope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Boxes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    scope: Option<String>,
    boxes: BTreeMap<String, ParameterBox>,
}

impl Boxes {
    /// Empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty collection bound to a scope; boxes attached to another scope are refused.
    #[must_use]
    pub fn for_scope(scope: &Scope) -> Self {
        Self {
            scope: Some(scope.name().to_string()),
            boxes: BTreeMap::new(),
        }
    }

    /// Add a box.
    ///
    /// # Errors
    ///
    /// `ScopeFormat` for a duplicate name, `Scope` if the box belongs to a
    /// different scope.
    pub fn insert(&mut self, bx: ParameterBox) -> Result<()> {
        if let (Some(mine), Some(theirs)) = (self.scope.as_deref(), bx.scope_name()) {
            if mine != theirs {
                return Err(Error::scope(format!(
                    "box '{}' belongs to scope '{theirs}', collection to '{mine}'",
                    bx.name()
                )));
            }
        }
        if self.boxes.contains_key(bx.name()) {
            return Err(Error::format(format!("duplicate box name '{}'", bx.name())));
        }
        self.boxes.insert(bx.name().to_string(), bx);
        Ok(())
    }

    /// Box by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ParameterBox> {
        self.boxes.get(name)
    }

    /// Boxes in name order.
    pub fn iter(&self) -> impl Iterator<Item = &ParameterBox> {
        self.boxes.values()
    }

    /// Number of boxes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    /// True when the collection holds no box.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    /// Union membership: true if any member contains the point.
    #[must_use]
    pub fn contains(&self, point: &Assignment) -> bool {
        self.boxes.values().any(|bx| bx.contains(point))
    }

    /// Names of the members containing the point.
    #[must_use]
    pub fn containing(&self, point: &Assignment) -> Vec<&str> {
        self.boxes
            .values()
            .filter(|bx| bx.contains(point))
            .map(ParameterBox::name)
            .collect()
    }
}
