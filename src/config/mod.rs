//! Composable test configuration
//!
//! A [`Config`] is an immutable bag of typed elements. Each element type is its
//! own key, and declares whether that key is [`Unique`] (combining two configs
//! keeps the right-hand element) or [`Multi`] (elements accumulate in order).
//!
//! # Example
//!
//! ```rust
//! use testkit_prepared::config::{Config, Ignored, Tag};
//!
//! let suite = Config::of(Tag::new("slow"));
//! let test = Config::of(Tag::new("db")).with(Ignored);
//! let merged = suite + test;
//!
//! assert!(merged.get::<Ignored>().is_some());
//! assert_eq!(merged.get_all::<Tag>().len(), 2);
//! ```

mod builtin;

pub use builtin::{only_if, IdleTimeout, Ignored, RandomSeed, Tag};

use std::any::{Any, TypeId};
use std::fmt;
use std::ops::Add;
use std::sync::Arc;

/// Marker for keys holding at most one element.
#[derive(Debug, Clone, Copy)]
pub struct Unique;

/// Marker for keys holding any number of elements, in insertion order.
#[derive(Debug, Clone, Copy)]
pub struct Multi;

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::Unique {}
    impl Sealed for super::Multi {}
}

/// Uniqueness of a configuration key. Implemented by [`Unique`] and [`Multi`].
pub trait Uniqueness: sealed::Sealed + 'static {
    /// `true` for [`Unique`].
    const UNIQUE: bool;
}

impl Uniqueness for Unique {
    const UNIQUE: bool = true;
}

impl Uniqueness for Multi {
    const UNIQUE: bool = false;
}

/// A configuration element.
///
/// The implementing type is the key under which the element is stored.
///
/// ```rust
/// use testkit_prepared::config::{Config, ConfigElement, Unique};
///
/// #[derive(Debug)]
/// struct Retries(u32);
///
/// impl ConfigElement for Retries {
///     type Uniqueness = Unique;
/// }
///
/// let config = Config::of(Retries(1)) + Config::of(Retries(3));
/// assert_eq!(config.get::<Retries>().map(|r| r.0), Some(3));
/// ```
pub trait ConfigElement: fmt::Debug + Send + Sync + 'static {
    /// Whether this key holds one or many elements.
    type Uniqueness: Uniqueness;
}

trait ErasedElement: fmt::Debug + Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn key(&self) -> TypeId;
    fn is_unique(&self) -> bool;
}

impl<E: ConfigElement> ErasedElement for E {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn key(&self) -> TypeId {
        TypeId::of::<E>()
    }

    fn is_unique(&self) -> bool {
        <E::Uniqueness as Uniqueness>::UNIQUE
    }
}

type Entries = Vec<(TypeId, Vec<Arc<dyn ErasedElement>>)>;

/// Immutable test configuration.
#[derive(Clone, Default)]
pub struct Config {
    repr: Repr,
}

#[derive(Clone, Default)]
enum Repr {
    #[default]
    Empty,
    Element(Arc<dyn ErasedElement>),
    Combined(Arc<Entries>),
}

impl Config {
    /// The empty configuration, identity of `+`.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// A configuration holding a single element.
    #[must_use]
    pub fn of<E: ConfigElement>(element: E) -> Self {
        Self {
            repr: Repr::Element(Arc::new(element)),
        }
    }

    /// Returns `self + Config::of(element)`.
    #[must_use]
    pub fn with<E: ConfigElement>(self, element: E) -> Self {
        self + Config::of(element)
    }

    /// Returns `true` if no element is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self.repr, Repr::Empty)
    }

    /// Finds the element stored under a [`Unique`] key.
    #[must_use]
    pub fn get<E>(&self) -> Option<&E>
    where
        E: ConfigElement<Uniqueness = Unique>,
    {
        self.elements(TypeId::of::<E>())
            .last()
            .and_then(|element| element.as_any().downcast_ref::<E>())
    }

    /// Finds all elements stored under a [`Multi`] key, in insertion order.
    #[must_use]
    pub fn get_all<E>(&self) -> Vec<&E>
    where
        E: ConfigElement<Uniqueness = Multi>,
    {
        self.elements(TypeId::of::<E>())
            .iter()
            .filter_map(|element| element.as_any().downcast_ref::<E>())
            .collect()
    }

    fn elements(&self, key: TypeId) -> &[Arc<dyn ErasedElement>] {
        match &self.repr {
            Repr::Empty => &[],
            Repr::Element(element) if element.key() == key => std::slice::from_ref(element),
            Repr::Element(_) => &[],
            Repr::Combined(entries) => entries
                .iter()
                .find(|(k, _)| *k == key)
                .map_or(&[], |(_, elements)| elements.as_slice()),
        }
    }

    fn entries(&self) -> Entries {
        match &self.repr {
            Repr::Empty => Vec::new(),
            Repr::Element(element) => vec![(element.key(), vec![Arc::clone(element)])],
            Repr::Combined(entries) => entries.as_ref().clone(),
        }
    }
}

impl Add for Config {
    type Output = Config;

    fn add(self, other: Config) -> Config {
        if self.is_empty() {
            return other;
        }
        if other.is_empty() {
            return self;
        }

        let mut entries = self.entries();
        for (key, elements) in other.entries() {
            let unique = elements.first().is_some_and(|e| e.is_unique());
            match entries.iter_mut().find(|(k, _)| *k == key) {
                Some((_, existing)) if unique => *existing = elements,
                Some((_, existing)) => existing.extend(elements),
                None => entries.push((key, elements)),
            }
        }

        Config {
            repr: Repr::Combined(Arc::new(entries)),
        }
    }
}

impl<E: ConfigElement> From<E> for Config {
    fn from(element: E) -> Self {
        Config::of(element)
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Config")?;
        f.debug_list()
            .entries(self.entries().iter().flat_map(|(_, elements)| elements.iter()))
            .finish()
    }
}
