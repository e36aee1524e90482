//! # Entitlements Core
//!
//! Core traits and types for deriving a user's entitlement state from a stream
//! of purchase and transaction-verification events.
//!
//! This crate is the functional core of the reconciliation engine. It owns no
//! I/O: upstream stores, catalogs and persistence are described by traits in
//! [`source`] and implemented by callers (or by the mocks in
//! `entitlements-testing`).
//!
//! ## Core Concepts
//!
//! - **Option**: a caller-defined purchasable item ([`option::PurchaseOption`])
//! - **Entitlement state**: the authoritative per-option fact ([`entitlement::EntitlementState`])
//! - **Mapper**: pure `VerifiedTransaction → EntitlementState` ([`mapper::map`])
//! - **Exclusivity reducer**: at most one active subscription per group ([`exclusivity::reduce`])
//! - **Reducer**: pure `(State, Action, Environment) → (State, Effects)`, hosted by the runtime `Store`
//!
//! ## Example
//!
//! ```
//! use entitlements_core::mapper;
//! use entitlements_core::transaction::VerifiedTransaction;
//! use entitlements_core::entitlement::EntitlementState;
//! use chrono::{Duration, Utc};
//!
//! let now = Utc::now();
//! let tx = VerifiedTransaction::new("com.app.pro.monthly", "1000")
//!     .with_expires_at(now + Duration::days(30));
//!
//! assert!(matches!(mapper::map(&tx, now), EntitlementState::SubscriptionActive { .. }));
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};
pub use smallvec::{SmallVec, smallvec};

pub mod entitlement;
pub mod error;
pub mod exclusivity;
pub mod mapper;
pub mod option;
pub mod product;
pub mod product_id;
pub mod source;
pub mod transaction;

/// Reducer module - The core trait for business logic
///
/// Reducers are pure functions: `(State, Action, Environment) → (State, Effects)`.
/// They contain all reconciliation logic and are deterministic and testable.
pub mod reducer {
    use super::effect::Effect;
    use smallvec::SmallVec;

    /// The Reducer trait - core abstraction for business logic
    ///
    /// # Type Parameters
    ///
    /// - `State`: The domain state this reducer operates on
    /// - `Action`: The action type this reducer processes
    /// - `Environment`: The injected dependencies this reducer needs
    ///
    /// # Example
    ///
    /// ```ignore
    /// impl Reducer for ReconcilerReducer<C> {
    ///     type State = ReconcilerState;
    ///     type Action = ReconcilerAction;
    ///     type Environment = ReconcilerEnvironment<C>;
    ///
    ///     fn reduce(
    ///         &self,
    ///         state: &mut ReconcilerState,
    ///         action: ReconcilerAction,
    ///         env: &ReconcilerEnvironment<C>,
    ///     ) -> SmallVec<[Effect<ReconcilerAction>; 4]> {
    ///         match action {
    ///             ReconcilerAction::Configure { options } => {
    ///                 state.table = OptionTable::from_options(options);
    ///                 smallvec![Effect::None]
    ///             }
    ///             _ => smallvec![Effect::None],
    ///         }
    ///     }
    /// }
    /// ```
    pub trait Reducer {
        /// The state type this reducer operates on
        type State;

        /// The action type this reducer processes
        type Action;

        /// The environment type with injected dependencies
        type Environment;

        /// Reduce an action into state changes and effects
        ///
        /// This is a pure function that:
        /// 1. Validates the action
        /// 2. Updates state in place
        /// 3. Returns effect descriptions to be executed
        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            env: &Self::Environment,
        ) -> SmallVec<[Effect<Self::Action>; 4]>;
    }
}

/// Effect module - Side effect descriptions
///
/// Effects describe side effects to be performed by the runtime.
/// They are values (not execution) and are composable.
pub mod effect {
    use std::future::Future;
    use std::pin::Pin;

    /// Effect type - describes a side effect to be executed
    ///
    /// Effects are NOT executed immediately. They are descriptions of what should happen,
    /// returned from reducers and executed by the Store runtime.
    pub enum Effect<Action> {
        /// No-op effect
        None,

        /// Run effects in parallel
        Parallel(Vec<Effect<Action>>),

        /// Run effects sequentially, each one completing before the next starts
        Sequential(Vec<Effect<Action>>),

        /// Arbitrary async computation
        ///
        /// Returns `Option<Action>` - if Some, the action is fed back into the reducer
        Future(Pin<Box<dyn Future<Output = Option<Action>> + Send>>),
    }

    // Manual Debug implementation since Future doesn't implement Debug
    impl<Action> std::fmt::Debug for Effect<Action> {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Effect::None => write!(f, "Effect::None"),
                Effect::Parallel(effects) => {
                    f.debug_tuple("Effect::Parallel").field(effects).finish()
                },
                Effect::Sequential(effects) => {
                    f.debug_tuple("Effect::Sequential").field(effects).finish()
                },
                Effect::Future(_) => write!(f, "Effect::Future(<future>)"),
            }
        }
    }

    impl<Action> Effect<Action> {
        /// Combine effects to run in parallel
        #[must_use]
        pub const fn merge(effects: Vec<Effect<Action>>) -> Effect<Action> {
            Effect::Parallel(effects)
        }

        /// Chain effects to run sequentially
        #[must_use]
        pub const fn chain(effects: Vec<Effect<Action>>) -> Effect<Action> {
            Effect::Sequential(effects)
        }

        /// Wrap a fire-and-forget async computation that never feeds back an action
        pub fn fire_and_forget<F>(fut: F) -> Effect<Action>
        where
            F: Future<Output = ()> + Send + 'static,
        {
            Effect::Future(Box::pin(async move {
                fut.await;
                None
            }))
        }

        /// Whether this effect does nothing when executed
        #[must_use]
        pub fn is_none(&self) -> bool {
            match self {
                Effect::None => true,
                Effect::Parallel(effects) | Effect::Sequential(effects) => {
                    effects.iter().all(Effect::is_none)
                },
                Effect::Future(_) => false,
            }
        }
    }
}

/// Environment module - Dependency injection traits
///
/// All time-dependent decisions go through [`Clock`](environment::Clock) so
/// that mapping and real-time re-evaluation are deterministic under test.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use entitlements_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let _now = clock.now();
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
