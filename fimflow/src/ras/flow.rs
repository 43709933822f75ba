//! Steady-flow file (`*.fNN`): profiles, discharges, boundary conditions.

use super::{key_value, parse_float_list, RasFileError};
use std::path::Path;

/// Downstream boundary condition of one profile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BoundaryCondition {
    /// Normal depth with the given friction slope.
    NormalDepth { slope: f64 },
    /// Imposed downstream water-surface elevation.
    KnownWse { elevation: f64 },
}

/// One steady profile: a name, a discharge, and its boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowProfile {
    pub name: String,
    pub discharge: f64,
    pub boundary: BoundaryCondition,
}

/// Parsed steady-flow file.
#[derive(Debug, Clone)]
pub struct FlowFile {
    pub title: String,
    /// Free-form description; runs store the profile-name map here.
    pub description: String,
    /// River and reach the flows apply to.
    pub river: String,
    pub reach: String,
    /// Station of the flow change location (the upstream section).
    pub station: f64,
    pub profiles: Vec<FlowProfile>,
}

impl FlowFile {
    pub fn read(path: &Path) -> Result<Self, RasFileError> {
        let text = std::fs::read_to_string(path)?;
        let mut title = String::new();
        let mut description = String::new();
        let mut river = String::new();
        let mut reach = String::new();
        let mut station = 0.0;
        let mut names: Vec<String> = Vec::new();
        let mut flows: Vec<f64> = Vec::new();
        let mut slopes: Vec<(usize, f64)> = Vec::new();
        let mut known: Vec<(usize, f64)> = Vec::new();
        let mut in_description = false;

        for line in text.lines() {
            let trimmed = line.trim_end();
            if trimmed == "BEGIN DESCRIPTION:" {
                in_description = true;
                continue;
            }
            if trimmed == "END DESCRIPTION:" {
                in_description = false;
                continue;
            }
            if in_description {
                if !description.is_empty() {
                    description.push('\n');
                }
                description.push_str(trimmed);
                continue;
            }
            if let Some((key, value)) = key_value(trimmed) {
                match key {
                    "Flow Title" => title = value.to_string(),
                    "Profile Names" => {
                        names = value.split(',').map(|s| s.trim().to_string()).collect()
                    }
                    "River Rch & RM" => {
                        let parts: Vec<&str> = value.split(',').map(str::trim).collect();
                        if parts.len() != 3 {
                            return Err(RasFileError::parse(path, "bad flow change location"));
                        }
                        river = parts[0].to_string();
                        reach = parts[1].to_string();
                        station = parts[2].parse().map_err(|_| {
                            RasFileError::parse(path, "flow change station is not a number")
                        })?;
                    }
                    "Flows" => flows = parse_float_list(value),
                    "Dn Slope" => {
                        let parts: Vec<&str> = value.split(',').map(str::trim).collect();
                        if parts.len() == 2 {
                            if let (Ok(idx), Ok(slope)) =
                                (parts[0].parse::<usize>(), parts[1].parse::<f64>())
                            {
                                slopes.push((idx, slope));
                            }
                        }
                    }
                    "Dn Known WS" => {
                        let parts: Vec<&str> = value.split(',').map(str::trim).collect();
                        if parts.len() == 2 {
                            if let (Ok(idx), Ok(elev)) =
                                (parts[0].parse::<usize>(), parts[1].parse::<f64>())
                            {
                                known.push((idx, elev));
                            }
                        }
                    }
                    _ => {}
                }
            }
        }

        if names.len() != flows.len() {
            return Err(RasFileError::parse(
                path,
                format!(
                    "profile count mismatch: {} names, {} flows",
                    names.len(),
                    flows.len()
                ),
            ));
        }

        let mut profiles: Vec<FlowProfile> = names
            .into_iter()
            .zip(flows)
            .map(|(name, discharge)| FlowProfile {
                name,
                discharge,
                boundary: BoundaryCondition::NormalDepth { slope: 0.001 },
            })
            .collect();
        for (idx, slope) in slopes {
            if let Some(profile) = profiles.get_mut(idx) {
                profile.boundary = BoundaryCondition::NormalDepth { slope };
            }
        }
        for (idx, elevation) in known {
            if let Some(profile) = profiles.get_mut(idx) {
                profile.boundary = BoundaryCondition::KnownWse { elevation };
            }
        }

        Ok(Self {
            title,
            description,
            river,
            reach,
            station,
            profiles,
        })
    }

    pub fn write(&self, path: &Path) -> Result<(), RasFileError> {
        let mut out = String::new();
        out.push_str(&format!("Flow Title={}\n", self.title));
        out.push_str(&format!("Number of Profiles={}\n", self.profiles.len()));
        if !self.description.is_empty() {
            out.push_str("BEGIN DESCRIPTION:\n");
            out.push_str(&self.description);
            out.push_str("\nEND DESCRIPTION:\n");
        }
        let names: Vec<&str> = self.profiles.iter().map(|p| p.name.as_str()).collect();
        out.push_str(&format!("Profile Names={}\n", names.join(",")));
        out.push_str(&format!(
            "River Rch & RM={},{},{}\n",
            self.river, self.reach, self.station
        ));
        let flows: Vec<String> = self
            .profiles
            .iter()
            .map(|p| format!("{}", p.discharge))
            .collect();
        out.push_str(&format!("Flows={}\n", flows.join(",")));
        for (idx, profile) in self.profiles.iter().enumerate() {
            match profile.boundary {
                BoundaryCondition::NormalDepth { slope } => {
                    out.push_str(&format!("Dn Slope={idx},{slope}\n"));
                }
                BoundaryCondition::KnownWse { elevation } => {
                    out.push_str(&format!("Dn Known WS={idx},{elevation}\n"));
                }
            }
        }
        std::fs::write(path, out)?;
        Ok(())
    }

    pub fn min_flow(&self) -> Option<f64> {
        self.profiles
            .iter()
            .map(|p| p.discharge)
            .min_by(|a, b| a.total_cmp(b))
    }

    pub fn max_flow(&self) -> Option<f64> {
        self.profiles
            .iter()
            .map(|p| p.discharge)
            .max_by(|a, b| a.total_cmp(b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_flow() -> FlowFile {
        FlowFile {
            title: "2823932_kwse".to_string(),
            description: "{\"0\":\"100-163\"}".to_string(),
            river: "2823932".to_string(),
            reach: "2823932".to_string(),
            station: 12345.0,
            profiles: vec![
                FlowProfile {
                    name: "0".to_string(),
                    discharge: 100.0,
                    boundary: BoundaryCondition::KnownWse { elevation: 163.0 },
                },
                FlowProfile {
                    name: "1".to_string(),
                    discharge: 250.0,
                    boundary: BoundaryCondition::NormalDepth { slope: 0.001 },
                },
            ],
        }
    }

    #[test]
    fn test_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model.f03");
        let flow = sample_flow();
        flow.write(&path).unwrap();
        let back = FlowFile::read(&path).unwrap();
        assert_eq!(back.title, flow.title);
        assert_eq!(back.river, "2823932");
        assert_eq!(back.station, 12345.0);
        assert_eq!(back.profiles, flow.profiles);
        assert_eq!(back.description, flow.description);
    }

    #[test]
    fn test_flow_extremes() {
        let flow = sample_flow();
        assert_eq!(flow.min_flow(), Some(100.0));
        assert_eq!(flow.max_flow(), Some(250.0));
    }

    #[test]
    fn test_profile_count_mismatch_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.f01");
        std::fs::write(
            &path,
            "Flow Title=bad\nProfile Names=0,1\nRiver Rch & RM=r,r,1\nFlows=100\n",
        )
        .unwrap();
        assert!(FlowFile::read(&path).is_err());
    }
}
