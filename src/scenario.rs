use std::fmt;

use typed_builder::TypedBuilder;

/// A named request action.
///
/// The action is called once per dispatched tick and returns a future
/// resolving to an [`Outcome`](crate::metric::Outcome). It is cloned into
/// every request task, so keep expensive state (HTTP clients, connection
/// pools) behind a cheap clone and build it outside the action.
///
/// ```rust
/// use arrival::{Scenario, metric::Outcome};
///
/// let scenario = Scenario::builder()
///     .name("ping")
///     .action(|| async { Outcome::Success(200) })
///     .build();
/// assert_eq!(scenario.name, "ping");
/// ```
#[derive(Clone, TypedBuilder)]
pub struct Scenario<F> {
    #[builder(setter(into))]
    pub name: String,
    pub action: F,
}

impl<F> fmt::Debug for Scenario<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scenario")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
