//! Configuration options which can alter the behavior of a client connection.

use crate::balancers::round_robin;
use crate::resolver;

/// Policy which is applicable to a client connection.
#[derive(Clone)]
pub struct Policy {
    /// A name for the connection, used in logs and probes.
    ///
    /// Default: None, in which case the target string is used.
    pub name: Option<String>,

    /// The name of the balancing strategy. Names are matched
    /// case-insensitively; an empty name selects the default.
    ///
    /// Default: "round_robin"
    pub balancer: String,

    /// Resolver builders consulted before the registry, for this connection
    /// only.
    ///
    /// Default: empty
    pub resolvers: Vec<resolver::SharedBuilder>,
}

impl Policy {
    pub fn with_balancer(mut self, balancer: impl ToString) -> Self {
        self.balancer = balancer.to_string();
        self
    }

    pub fn with_resolver(mut self, builder: resolver::SharedBuilder) -> Self {
        self.resolvers.push(builder);
        self
    }

    pub fn with_name(mut self, name: impl ToString) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// Returns the per-connection builder for `scheme`, if any.
    ///
    /// If several builders share a scheme, the first one added wins.
    pub(crate) fn resolver(&self, scheme: &str) -> Option<resolver::SharedBuilder> {
        self.resolvers
            .iter()
            .find(|builder| builder.scheme() == scheme)
            .cloned()
    }
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            name: None,
            balancer: round_robin::NAME.to_string(),
            resolvers: vec![],
        }
    }
}

impl std::fmt::Debug for Policy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Policy")
            .field("name", &self.name)
            .field("balancer", &self.balancer)
            .field(
                "resolvers",
                &self
                    .resolvers
                    .iter()
                    .map(|builder| builder.scheme().to_string())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}
