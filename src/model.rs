use std::fmt;
use std::str::FromStr;

use tracing::warn;

/// Facility categories accepted by the `facilities.type` CHECK constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FacilityType {
    Arztpraxis,
    Apotheke,
    Pflege,
    Krankenhaus,
    Sanitaetshaus,
    AmbulanterPflegedienst,
    StationaerePflege,
    Kurzzeitpflege,
    Therapie,
    Beratungsstelle,
    Sonstiges,
}

impl FacilityType {
    pub const ALL: [FacilityType; 11] = [
        FacilityType::Arztpraxis,
        FacilityType::Apotheke,
        FacilityType::Pflege,
        FacilityType::Krankenhaus,
        FacilityType::Sanitaetshaus,
        FacilityType::AmbulanterPflegedienst,
        FacilityType::StationaerePflege,
        FacilityType::Kurzzeitpflege,
        FacilityType::Therapie,
        FacilityType::Beratungsstelle,
        FacilityType::Sonstiges,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FacilityType::Arztpraxis => "ARZTPRAXIS",
            FacilityType::Apotheke => "APOTHEKE",
            FacilityType::Pflege => "PFLEGE",
            FacilityType::Krankenhaus => "KRANKENHAUS",
            FacilityType::Sanitaetshaus => "SANITAETSHAUS",
            FacilityType::AmbulanterPflegedienst => "AMBULANTER_PFLEGEDIENST",
            FacilityType::StationaerePflege => "STATIONAERE_PFLEGE",
            FacilityType::Kurzzeitpflege => "KURZZEITPFLEGE",
            FacilityType::Therapie => "THERAPIE",
            FacilityType::Beratungsstelle => "BERATUNGSSTELLE",
            FacilityType::Sonstiges => "SONSTIGES",
        }
    }

    /// Map a free-text category label from a source page.
    ///
    /// Unknown labels fall back to `Sonstiges` and are logged so the table
    /// can be extended by hand.
    pub fn from_label(label: &str) -> FacilityType {
        let normalized = label.trim().to_lowercase();
        let mapped = match normalized.as_str() {
            "ambulanter dienst" | "ambulanter pflegedienst" => Some(FacilityType::AmbulanterPflegedienst),
            "kurzzeitpflege" => Some(FacilityType::Kurzzeitpflege),
            "krankenhaus" => Some(FacilityType::Krankenhaus),
            "sanitätshaus" => Some(FacilityType::Sanitaetshaus),
            "therapie" => Some(FacilityType::Therapie),
            "beratungsstelle" => Some(FacilityType::Beratungsstelle),
            _ => None,
        };
        mapped.unwrap_or_else(|| {
            warn!(label = %label.trim(), "Unmapped facility type label, using SONSTIGES");
            FacilityType::Sonstiges
        })
    }
}

impl fmt::Display for FacilityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FacilityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_uppercase();
        FacilityType::ALL
            .into_iter()
            .find(|t| t.as_str() == upper)
            .ok_or_else(|| format!("unknown facility type: {}", s))
    }
}

/// Canonical facility shape produced by every source adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct FacilityFragment {
    pub source: String,
    pub source_key: String,
    pub name: String,
    pub facility_type: FacilityType,
    pub street: String,
    pub postal_code: String,
    pub city: String,
    pub phone: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub wheelchair_accessible: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DoctorFragment {
    pub source: String,
    /// Source-native practitioner id, used verbatim.
    pub source_key: String,
    pub first_name: String,
    pub last_name: String,
    pub name: String,
    pub specialty: Option<String>,
}

/// One adapter output unit. Sources that only list locations carry no doctor.
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub facility: FacilityFragment,
    pub doctor: Option<DoctorFragment>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::fmt::MakeWriter;

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    struct LogWriter(Arc<Mutex<Vec<u8>>>);

    impl<'a> MakeWriter<'a> for LogBuffer {
        type Writer = LogWriter;

        fn make_writer(&'a self) -> Self::Writer {
            LogWriter(Arc::clone(&self.0))
        }
    }

    impl io::Write for LogWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Run `f` with a subscriber that records formatted events.
    fn captured_logs<T>(f: impl FnOnce() -> T) -> (T, String) {
        let sink = LogBuffer::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(sink.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        let out = tracing::subscriber::with_default(subscriber, f);
        let text = String::from_utf8(sink.0.lock().unwrap().clone()).unwrap();
        (out, text)
    }

    #[test]
    fn label_mapping_ignores_case_and_whitespace() {
        for label in [
            "Ambulanter Pflegedienst",
            "ambulanter pflegedienst",
            "AMBULANTER PFLEGEDIENST",
            "  Ambulanter Pflegedienst ",
            "Ambulanter Dienst",
        ] {
            assert_eq!(FacilityType::from_label(label), FacilityType::AmbulanterPflegedienst);
        }
        assert_eq!(
            FacilityType::from_label("Ambulanter Pflegedienst").as_str(),
            "AMBULANTER_PFLEGEDIENST"
        );
    }

    #[test]
    fn label_mapping_handles_umlauts() {
        assert_eq!(FacilityType::from_label("Sanitätshaus"), FacilityType::Sanitaetshaus);
        assert_eq!(FacilityType::from_label("SANITÄTSHAUS"), FacilityType::Sanitaetshaus);
    }

    #[test]
    fn unknown_label_falls_back_to_sonstiges() {
        assert_eq!(FacilityType::from_label("Selbsthilfegruppe"), FacilityType::Sonstiges);
        assert_eq!(FacilityType::from_label(""), FacilityType::Sonstiges);
        assert_eq!(FacilityType::from_label("Tierarzt").as_str(), "SONSTIGES");
    }

    #[test]
    fn unknown_label_is_logged_as_warning() {
        let (t, logs) = captured_logs(|| FacilityType::from_label("  Selbsthilfegruppe "));
        assert_eq!(t, FacilityType::Sonstiges);
        let line = logs.lines().find(|l| l.contains("Unmapped facility type")).unwrap();
        assert!(line.contains("WARN"));
        assert!(line.contains("label=Selbsthilfegruppe"));
    }

    #[test]
    fn known_label_logs_nothing() {
        let (t, logs) = captured_logs(|| FacilityType::from_label("Therapie"));
        assert_eq!(t, FacilityType::Therapie);
        assert!(logs.is_empty());
    }

    #[test]
    fn parse_stored_names() {
        for t in FacilityType::ALL {
            assert_eq!(t.as_str().parse::<FacilityType>(), Ok(t));
        }
        assert_eq!("krankenhaus".parse::<FacilityType>(), Ok(FacilityType::Krankenhaus));
        assert!("HOSPITAL".parse::<FacilityType>().is_err());
    }
}
