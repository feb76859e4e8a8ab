use indexmap::IndexMap;

use crate::model::{DoctorFragment, FacilityFragment, Fragment};

/// One facility with the doctors seen for it during a run.
#[derive(Debug, Clone)]
pub struct FacilityGroup {
    pub facility: FacilityFragment,
    pub doctors: IndexMap<String, DoctorFragment>,
}

/// Groups fragments by facility key, keeping first-seen order.
///
/// Merge policy: the first fragment of a facility fixes its attributes for
/// the run; a repeated doctor key replaces the earlier record.
#[derive(Debug, Default)]
pub struct Aggregator {
    groups: IndexMap<(String, String), FacilityGroup>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, fragment: Fragment) {
        let Fragment { facility, doctor } = fragment;
        let group = self
            .groups
            .entry((facility.source.clone(), facility.source_key.clone()))
            .or_insert_with(|| FacilityGroup {
                facility,
                doctors: IndexMap::new(),
            });

        if let Some(doctor) = doctor {
            group.doctors.insert(doctor.source_key.clone(), doctor);
        }
    }

    pub fn facility_count(&self) -> usize {
        self.groups.len()
    }

    pub fn doctor_count(&self) -> usize {
        self.groups.values().map(|g| g.doctors.len()).sum()
    }

    pub fn into_groups(self) -> Vec<FacilityGroup> {
        self.groups.into_values().collect()
    }
}

impl Extend<Fragment> for Aggregator {
    fn extend<I: IntoIterator<Item = Fragment>>(&mut self, iter: I) {
        for fragment in iter {
            self.push(fragment);
        }
    }
}
