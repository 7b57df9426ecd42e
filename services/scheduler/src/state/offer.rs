//! Offer capacity bookkeeping and placement constraints.

use berth_proto::{resource_names, Offer, Range};
use regex::Regex;

use super::task::TaskResources;
use super::version::Version;
use super::StateError;

/// Slack for floating point resource comparisons.
const EPSILON: f64 = 1e-6;

/// Remaining capacity of one offer during a matching pass.
///
/// Capacity only ever decreases and is clamped at zero.
#[derive(Debug, Clone)]
pub struct OfferCapacity {
    offer: Offer,
    cpus: f64,
    mem: f64,
    disk: f64,
    /// Unclaimed host port ranges, in offer order.
    ports: Vec<Range>,
}

impl OfferCapacity {
    pub fn new(offer: Offer) -> Self {
        let cpus = offer.scalar(resource_names::CPUS).max(0.0);
        let mem = offer.scalar(resource_names::MEM).max(0.0);
        let disk = offer.scalar(resource_names::DISK).max(0.0);
        let ports = offer
            .ranges(resource_names::PORTS)
            .into_iter()
            .filter(|r| !r.is_empty())
            .collect();
        Self {
            offer,
            cpus,
            mem,
            disk,
            ports,
        }
    }

    pub fn offer(&self) -> &Offer {
        &self.offer
    }

    pub fn cpus(&self) -> f64 {
        self.cpus
    }

    pub fn mem(&self) -> f64 {
        self.mem
    }

    pub fn disk(&self) -> f64 {
        self.disk
    }

    pub fn available_ports(&self) -> u64 {
        self.ports.iter().map(Range::len).sum()
    }

    /// Whether the remaining capacity can host one instance of `version`.
    pub fn fits(&self, version: &Version) -> bool {
        version.cpus <= self.cpus + EPSILON
            && version.mem <= self.mem + EPSILON
            && version.disk <= self.disk + EPSILON
            && version.required_host_ports() as u64 <= self.available_ports()
            && version
                .placement()
                .is_some_and(|constraints| constraints.iter().all(|c| c.matches(&self.offer)))
    }

    /// Deduct one instance of `version` and return what was claimed.
    ///
    /// Callers check [`fits`](Self::fits) first; deducting more than remains
    /// clamps the remainder to zero.
    pub fn consume(&mut self, version: &Version) -> TaskResources {
        self.cpus = (self.cpus - version.cpus).max(0.0);
        self.mem = (self.mem - version.mem).max(0.0);
        self.disk = (self.disk - version.disk).max(0.0);
        let ports = self.take_ports(version.required_host_ports());

        TaskResources {
            cpus: version.cpus,
            mem: version.mem,
            disk: version.disk,
            ports,
        }
    }

    fn take_ports(&mut self, mut count: usize) -> Vec<u64> {
        let mut taken = Vec::with_capacity(count);
        while count > 0 {
            let Some(range) = self.ports.first_mut() else {
                break;
            };
            taken.push(range.begin);
            count -= 1;
            if range.begin == range.end {
                self.ports.remove(0);
            } else {
                range.begin += 1;
            }
        }
        taken
    }
}

// =============================================================================
// Constraints
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintOp {
    /// Attribute value fully matches the regex.
    Like,
    /// Attribute is absent or does not match the regex.
    Unlike,
    /// Attribute equals the value.
    Cluster,
}

/// Parsed `attribute:OPERATOR[:value]`.
#[derive(Debug, Clone)]
pub struct Constraint {
    pub attribute: String,
    pub op: ConstraintOp,
    pub value: String,
    pattern: Option<Regex>,
}

impl Constraint {
    pub fn parse(raw: &str) -> Result<Self, StateError> {
        let invalid = |reason: &str| StateError::InvalidConstraint {
            constraint: raw.to_string(),
            reason: reason.to_string(),
        };

        let mut parts = raw.splitn(3, ':');
        let attribute = parts
            .next()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| invalid("missing attribute"))?;
        let op = match parts.next().map(|s| s.trim().to_ascii_uppercase()).as_deref() {
            Some("LIKE") => ConstraintOp::Like,
            Some("UNLIKE") => ConstraintOp::Unlike,
            Some("CLUSTER") => ConstraintOp::Cluster,
            Some(other) => return Err(invalid(&format!("unknown operator {other}"))),
            None => return Err(invalid("missing operator")),
        };
        let value = parts.next().unwrap_or("").to_string();

        let pattern = match op {
            ConstraintOp::Like | ConstraintOp::Unlike => Some(
                Regex::new(&format!("^(?:{value})$")).map_err(|e| invalid(&e.to_string()))?,
            ),
            ConstraintOp::Cluster => {
                if value.is_empty() {
                    return Err(invalid("CLUSTER requires a value"));
                }
                None
            }
        };

        Ok(Self {
            attribute: attribute.to_string(),
            op,
            value,
            pattern,
        })
    }

    pub fn matches(&self, offer: &Offer) -> bool {
        let actual = if self.attribute == "hostname" {
            Some(offer.hostname.clone())
        } else {
            offer.attribute(&self.attribute).and_then(|a| a.value_string())
        };

        match (self.op, actual) {
            (ConstraintOp::Cluster, Some(actual)) => actual == self.value,
            (ConstraintOp::Like, Some(actual)) => self.regex_matches(&actual),
            (ConstraintOp::Unlike, Some(actual)) => !self.regex_matches(&actual),
            (ConstraintOp::Unlike, None) => true,
            (ConstraintOp::Cluster | ConstraintOp::Like, None) => false,
        }
    }

    fn regex_matches(&self, actual: &str) -> bool {
        self.pattern.as_ref().is_some_and(|p| p.is_match(actual))
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::state::version::fixtures::{bridged, version};
    use berth_id::AppId;
    use rstest::rstest;

    #[test]
    fn test_consume_deducts_and_clamps() {
        let app = AppId::new();
        let mut capacity = OfferCapacity::new(offer("o", 1.0, 256.0));
        let v = version(app, 0.4, 128.0, 1);

        assert!(capacity.fits(&v));
        capacity.consume(&v);
        assert!(capacity.fits(&v));
        capacity.consume(&v);
        assert!(!capacity.fits(&v));

        let big = version(app, 5.0, 1.0, 1);
        capacity.consume(&big);
        assert_eq!(capacity.cpus(), 0.0);
        assert!(capacity.mem() >= 0.0);
    }

    #[test]
    fn test_float_slack() {
        let app = AppId::new();
        let mut capacity = OfferCapacity::new(offer("o", 0.3, 64.0));
        let v = version(app, 0.1, 1.0, 1);
        for _ in 0..3 {
            assert!(capacity.fits(&v));
            capacity.consume(&v);
        }
        assert!(!capacity.fits(&v));
    }

    #[test]
    fn test_ports_are_claimed_in_order() {
        let app = AppId::new();
        let mut capacity = OfferCapacity::new(with_ports(offer("o", 4.0, 1024.0), 31000, 31002));
        let v = bridged(version(app, 1.0, 64.0, 1), &[80, 443]);

        assert!(capacity.fits(&v));
        let claimed = capacity.consume(&v);
        assert_eq!(claimed.ports, vec![31000, 31001]);
        assert_eq!(capacity.available_ports(), 1);
        assert!(!capacity.fits(&v));
    }

    #[test]
    fn test_bridge_without_ports_does_not_fit() {
        let app = AppId::new();
        let capacity = OfferCapacity::new(offer("o", 4.0, 1024.0));
        assert!(!capacity.fits(&bridged(version(app, 1.0, 64.0, 1), &[80])));
    }

    #[rstest]
    #[case("hostname:LIKE:node-.*", true)]
    #[case("hostname:LIKE:node", false)]
    #[case("hostname:UNLIKE:node-b", true)]
    #[case("rack:CLUSTER:r1", true)]
    #[case("rack:CLUSTER:r2", false)]
    #[case("zone:UNLIKE:east", true)]
    #[case("zone:LIKE:.*", false)]
    #[case("rack:like:r[0-9]", true)]
    fn test_constraint_matching(#[case] raw: &str, #[case] expected: bool) {
        let constraint = Constraint::parse(raw).unwrap();
        assert_eq!(constraint.matches(&offer("o", 1.0, 1.0)), expected);
    }

    #[rstest]
    #[case("")]
    #[case("rack")]
    #[case("rack:NEAR:r1")]
    #[case("rack:CLUSTER")]
    #[case("rack:LIKE:(")]
    fn test_constraint_parse_errors(#[case] raw: &str) {
        assert!(Constraint::parse(raw).is_err());
    }

    #[test]
    fn test_bad_constraint_never_fits() {
        let app = AppId::new();
        let mut v = version(app, 0.1, 1.0, 1);
        v.constraints.push("rack:NEAR:r1".to_string());
        assert!(!OfferCapacity::new(offer("o", 1.0, 64.0)).fits(&v));
    }

    #[test]
    fn test_constraints_compile_once_per_version() {
        let app = AppId::new();
        let mut v = version(app, 0.1, 1.0, 1);
        v.constraints.push("rack:LIKE:r[0-9]+".to_string());
        v.constraints.push("hostname:UNLIKE:node-b".to_string());

        let capacity = OfferCapacity::new(offer("o", 1.0, 64.0));
        assert!(capacity.fits(&v));
        let compiled = v.placement().unwrap().as_ptr();
        assert!(capacity.fits(&v));
        assert_eq!(v.placement().unwrap().as_ptr(), compiled);

        // A version read back from the store compiles its own copy.
        let restored: Version = serde_json::from_str(&serde_json::to_string(&v).unwrap()).unwrap();
        assert_eq!(restored, v);
        assert_eq!(restored.placement().unwrap().len(), 2);
        assert!(capacity.fits(&restored));
    }
}
