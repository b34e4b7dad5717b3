//! Static routing table between endpoint roles.

use crate::link::Role;
use heapless::Vec;

/// Upper bound on routes: every ordered pair of distinct roles.
pub const MAX_ROUTES: usize = 6;

/// Destination of pedal traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PedalRoute {
    ToAmplifier,
    ToApp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Route {
    pub from: Role,
    pub to: Role,
}

impl Route {
    pub const fn new(from: Role, to: Role) -> Self {
        Self { from, to }
    }
}

/// Fixed at construction, never mutated afterwards.
#[derive(Debug, Clone)]
pub struct RoutingTable {
    routes: Vec<Route, MAX_ROUTES>,
}

impl RoutingTable {
    /// App ↔ Amplifier in both directions, plus the pedal route.
    pub fn new(pedal: PedalRoute) -> Self {
        let pedal_to = match pedal {
            PedalRoute::ToAmplifier => Role::Amplifier,
            PedalRoute::ToApp => Role::App,
        };
        Self::from_routes(&[
            Route::new(Role::App, Role::Amplifier),
            Route::new(Role::Amplifier, Role::App),
            Route::new(Role::Pedal, pedal_to),
        ])
    }

    /// Duplicates and self-routes are dropped.
    pub fn from_routes(routes: &[Route]) -> Self {
        let mut table = Vec::new();
        for route in routes {
            if route.from == route.to || table.contains(route) {
                continue;
            }
            let _ = table.push(*route);
        }
        Self { routes: table }
    }

    pub fn destinations(&self, from: Role) -> impl Iterator<Item = Role> + '_ {
        self.routes.iter().filter(move |r| r.from == from).map(|r| r.to)
    }

    pub fn sources(&self, to: Role) -> impl Iterator<Item = Role> + '_ {
        self.routes.iter().filter(move |r| r.to == to).map(|r| r.from)
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(it: impl Iterator<Item = Role>) -> std::vec::Vec<Role> {
        it.collect()
    }

    #[test]
    fn default_pedal_goes_to_app() {
        let t = RoutingTable::new(PedalRoute::ToApp);
        assert_eq!(collect(t.destinations(Role::App)), [Role::Amplifier]);
        assert_eq!(collect(t.destinations(Role::Amplifier)), [Role::App]);
        assert_eq!(collect(t.destinations(Role::Pedal)), [Role::App]);
        assert_eq!(collect(t.sources(Role::App)), [Role::Amplifier, Role::Pedal]);
        assert!(collect(t.sources(Role::Pedal)).is_empty());
    }

    #[test]
    fn pedal_to_amplifier() {
        let t = RoutingTable::new(PedalRoute::ToAmplifier);
        assert_eq!(collect(t.destinations(Role::Pedal)), [Role::Amplifier]);
        assert_eq!(collect(t.sources(Role::Amplifier)), [Role::App, Role::Pedal]);
    }

    #[test]
    fn duplicates_and_self_routes_ignored() {
        let t = RoutingTable::from_routes(&[
            Route::new(Role::App, Role::App),
            Route::new(Role::App, Role::Amplifier),
            Route::new(Role::App, Role::Amplifier),
        ]);
        assert_eq!(t.routes().len(), 1);
    }
}
