use std::error::Error as StdError;
use std::fmt;

use serde::{Deserialize, Serialize};

pub const DEFAULT_PROFILE_NAME: &str = "default";
pub const DEFAULT_MODEL: &str = "gpt-4o";

#[derive(Debug, PartialEq, Eq)]
pub enum ProfileError {
    NotFound(String),
}

impl fmt::Display for ProfileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProfileError::NotFound(name) => write!(f, "No profile named '{name}'"),
        }
    }
}

impl StdError for ProfileError {}

/// Named bundle of model selection and generation parameters. Referenced by
/// sessions by name, never owned by them.
///
/// All generation parameters are optional; unset fields are omitted from API
/// requests so the provider's own defaults apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    pub model: String,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f64>,
    /// Sent as a leading system message when present.
    pub system_prompt: Option<String>,
}

impl Profile {
    pub fn new(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            temperature: None,
            max_tokens: None,
            top_p: None,
            system_prompt: None,
        }
    }
}

impl Default for Profile {
    fn default() -> Self {
        Self::new(DEFAULT_PROFILE_NAME, DEFAULT_MODEL)
    }
}

/// Read-mostly registry of profiles, loaded from config at startup.
///
/// A registry is never empty: when the config defines no profiles, a built-in
/// default is installed so the app starts usable with env-var auth alone.
#[derive(Debug, Clone)]
pub struct ProfileRegistry {
    profiles: Vec<Profile>,
}

impl ProfileRegistry {
    pub fn new(mut profiles: Vec<Profile>) -> Self {
        if profiles.is_empty() {
            profiles.push(Profile::default());
        }
        Self { profiles }
    }

    pub fn list(&self) -> &[Profile] {
        &self.profiles
    }

    pub fn get(&self, name: &str) -> Result<&Profile, ProfileError> {
        self.profiles
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| ProfileError::NotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.profiles.iter().any(|p| p.name == name)
    }

    /// Insert a profile, replacing any existing profile with the same name.
    pub fn upsert(&mut self, profile: Profile) {
        match self.profiles.iter_mut().find(|p| p.name == profile.name) {
            Some(existing) => *existing = profile,
            None => self.profiles.push(profile),
        }
    }

    /// Name of the profile new sessions should start with: the requested one
    /// if it exists, else the first registered profile.
    pub fn resolve_initial(&self, requested: Option<&str>) -> Result<&Profile, ProfileError> {
        match requested {
            Some(name) => self.get(name),
            None => Ok(&self.profiles[0]),
        }
    }
}

impl Default for ProfileRegistry {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_registry_gets_builtin_default() {
        let registry = ProfileRegistry::default();
        assert_eq!(registry.list().len(), 1);
        assert_eq!(registry.get(DEFAULT_PROFILE_NAME).unwrap().model, DEFAULT_MODEL);
    }

    #[test]
    fn get_missing_profile_fails() {
        let registry = ProfileRegistry::default();
        assert_eq!(
            registry.get("fancy"),
            Err(ProfileError::NotFound("fancy".to_string()))
        );
    }

    #[test]
    fn upsert_adds_new_profiles() {
        let mut registry = ProfileRegistry::default();
        registry.upsert(Profile::new("fast", "gpt-4o-mini"));
        assert_eq!(registry.list().len(), 2);
        assert_eq!(registry.get("fast").unwrap().model, "gpt-4o-mini");
    }

    #[test]
    fn upsert_with_duplicate_name_updates_in_place() {
        let mut registry = ProfileRegistry::default();
        registry.upsert(Profile::new("fast", "gpt-4o-mini"));

        let mut updated = Profile::new("fast", "gpt-4o-mini");
        updated.temperature = Some(0.2);
        registry.upsert(updated);

        assert_eq!(registry.list().len(), 2);
        assert_eq!(registry.get("fast").unwrap().temperature, Some(0.2));
    }

    #[test]
    fn resolve_initial_falls_back_to_first_profile() {
        let mut registry = ProfileRegistry::new(vec![Profile::new("main", "gpt-4o")]);
        registry.upsert(Profile::new("other", "gpt-4o-mini"));

        assert_eq!(registry.resolve_initial(None).unwrap().name, "main");
        assert_eq!(registry.resolve_initial(Some("other")).unwrap().name, "other");
        assert!(registry.resolve_initial(Some("missing")).is_err());
    }
}
