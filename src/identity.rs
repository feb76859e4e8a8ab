use sha2::{Digest, Sha256};

/// Derives stable facility keys for one source namespace.
///
/// The address is the preferred identity signal; coordinates are only used
/// when street, postal code and city are not all present. Partial addresses
/// count as absent. Sources that list several facilities at one address fold
/// the facility name into the key.
#[derive(Debug, Clone)]
pub struct IdentityResolver {
    namespace: String,
    fold_name: bool,
}

impl IdentityResolver {
    pub fn new(namespace: impl Into<String>) -> Self {
        IdentityResolver {
            namespace: namespace.into(),
            fold_name: false,
        }
    }

    pub fn with_name_folding(mut self) -> Self {
        self.fold_name = true;
        self
    }

    pub fn resolve_facility_key(
        &self,
        name: &str,
        street: &str,
        postal: &str,
        city: &str,
        lat: Option<f64>,
        lon: Option<f64>,
    ) -> String {
        let mut parts: Vec<String> = vec![self.namespace.clone()];
        if self.fold_name {
            parts.push(name.trim().to_string());
        }

        if has_full_address(street, postal, city) {
            parts.extend([street, postal, city].iter().map(|p| p.trim().to_string()));
        } else {
            parts.push(format_coord(lat));
            parts.push(format_coord(lon));
        }

        hash_key(&parts.join("|").to_lowercase())
    }
}

fn has_full_address(street: &str, postal: &str, city: &str) -> bool {
    [street, postal, city].iter().all(|p| !p.trim().is_empty())
}

fn format_coord(v: Option<f64>) -> String {
    match v {
        Some(v) => v.to_string(),
        None => "none".to_string(),
    }
}

fn hash_key(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    const LAT: Option<f64> = Some(51.5285024259591);
    const LON: Option<f64> = Some(7.07863180952606);

    fn kvwl() -> IdentityResolver {
        IdentityResolver::new("kvwl")
    }

    #[test]
    fn same_address_same_key() {
        let r = kvwl();
        let a = r.resolve_facility_key("Praxis", "Bochumer Straße 242", "45886", "Gelsenkirchen", LAT, LON);
        let b = r.resolve_facility_key("Praxis", "Bochumer Straße 242", "45886", "Gelsenkirchen", LAT, LON);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn any_address_change_changes_key() {
        let r = kvwl();
        let base = r.resolve_facility_key("", "Bochumer Straße 242", "45886", "Gelsenkirchen", None, None);
        let street = r.resolve_facility_key("", "Bochumer Straße 244", "45886", "Gelsenkirchen", None, None);
        let postal = r.resolve_facility_key("", "Bochumer Straße 242", "45881", "Gelsenkirchen", None, None);
        let city = r.resolve_facility_key("", "Bochumer Straße 242", "45886", "Essen", None, None);
        assert_ne!(base, street);
        assert_ne!(base, postal);
        assert_ne!(base, city);
    }

    #[test]
    fn address_is_case_insensitive() {
        let r = kvwl();
        let a = r.resolve_facility_key("", "Bochumer Straße 242", "45886", "Gelsenkirchen", None, None);
        let b = r.resolve_facility_key("", "BOCHUMER STRAßE 242", "45886", "GELSENKIRCHEN", None, None);
        let c = r.resolve_facility_key("", "bochumer straße 242", "45886", "gelsenkirchen", None, None);
        assert_eq!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn address_wins_over_coordinates() {
        let r = kvwl();
        let a = r.resolve_facility_key("", "Hauptstr. 1", "45879", "Gelsenkirchen", Some(51.1), Some(7.1));
        let b = r.resolve_facility_key("", "Hauptstr. 1", "45879", "Gelsenkirchen", Some(51.9), Some(7.9));
        assert_eq!(a, b);
    }

    #[test]
    fn missing_address_uses_coordinates() {
        let r = kvwl();
        let a = r.resolve_facility_key("", "", "", "", LAT, LON);
        let b = r.resolve_facility_key("", "", "", "", LAT, LON);
        let moved = r.resolve_facility_key("", "", "", "", Some(51.6), LON);
        assert_eq!(a, b);
        assert_ne!(a, moved);
        assert_eq!(a, hash_key("kvwl|51.5285024259591|7.07863180952606"));
    }

    #[test]
    fn partial_address_falls_back_to_coordinates() {
        let r = kvwl();
        let partial = r.resolve_facility_key("", "Hauptstr. 1", "", "Gelsenkirchen", LAT, LON);
        let coords_only = r.resolve_facility_key("", "", "", "", LAT, LON);
        assert_eq!(partial, coords_only);

        let blank = r.resolve_facility_key("", "Hauptstr. 1", "   ", "Gelsenkirchen", LAT, LON);
        assert_eq!(blank, coords_only);
    }

    #[test]
    fn namespace_separates_sources() {
        let a = IdentityResolver::new("kvwl").resolve_facility_key("", "A 1", "45879", "GE", None, None);
        let b = IdentityResolver::new("other").resolve_facility_key("", "A 1", "45879", "GE", None, None);
        assert_ne!(a, b);
    }

    #[test]
    fn name_only_counts_when_folded() {
        let plain = kvwl();
        assert_eq!(
            plain.resolve_facility_key("Praxis A", "A 1", "45879", "GE", None, None),
            plain.resolve_facility_key("Praxis B", "A 1", "45879", "GE", None, None),
        );

        let folded = kvwl().with_name_folding();
        assert_ne!(
            folded.resolve_facility_key("Praxis A", "A 1", "45879", "GE", None, None),
            folded.resolve_facility_key("Praxis B", "A 1", "45879", "GE", None, None),
        );
        assert_ne!(
            folded.resolve_facility_key("Praxis A", "", "", "", LAT, LON),
            folded.resolve_facility_key("Praxis B", "", "", "", LAT, LON),
        );
    }

    #[test]
    fn missing_coordinates_are_stable() {
        let r = kvwl();
        assert_eq!(
            r.resolve_facility_key("", "", "", "", None, None),
            hash_key("kvwl|none|none")
        );
    }
}
