//! Typed model specification.
//!
//! Models are described by explicit predictor, term and nesting structures
//! rather than formula strings:
//!
//! ```
//! use ldpsa_casi::data::{ModelSpec, Predictor};
//!
//! // casi ~ topsub + disp + disp:stime
//! let spec = ModelSpec::new("casi")
//!     .main(Predictor::factor("topsub"))
//!     .main(Predictor::factor("disp"))
//!     .interaction(Predictor::factor("disp"), Predictor::numeric("stime"));
//! assert_eq!(spec.to_string(), "casi ~ topsub + disp + disp:stime");
//! ```

use serde::{Deserialize, Serialize};

/// How a predictor enters the design matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Coding {
    /// Treatment-coded factor; the first sorted level is the reference.
    Factor,
    /// Numeric covariate divided by `divisor` before use.
    Numeric { divisor: f64 },
}

/// A named variable with its coding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predictor {
    pub name: String,
    pub coding: Coding,
}

impl Predictor {
    /// Treatment-coded factor predictor.
    pub fn factor(name: &str) -> Self {
        Self {
            name: name.to_string(),
            coding: Coding::Factor,
        }
    }

    /// Numeric predictor used as-is.
    pub fn numeric(name: &str) -> Self {
        Self::scaled(name, 1.0)
    }

    /// Numeric predictor divided by `divisor`.
    pub fn scaled(name: &str, divisor: f64) -> Self {
        Self {
            name: name.to_string(),
            coding: Coding::Numeric { divisor },
        }
    }

    pub fn is_factor(&self) -> bool {
        matches!(self.coding, Coding::Factor)
    }

    /// Label used for coefficient names (`depth`, `I(depth/100)`).
    pub fn label(&self) -> String {
        match self.coding {
            Coding::Numeric { divisor } if divisor != 1.0 => {
                format!("I({}/{})", self.name, crate::data::format_number(divisor))
            }
            _ => self.name.clone(),
        }
    }
}

/// A term in a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Term {
    /// Main effect of a predictor.
    Main(Predictor),
    /// Interaction between two predictors.
    Interaction(Predictor, Predictor),
}

impl Term {
    /// Get the variable names involved in this term.
    pub fn variables(&self) -> Vec<&str> {
        match self {
            Term::Main(p) => vec![p.name.as_str()],
            Term::Interaction(a, b) => vec![a.name.as_str(), b.name.as_str()],
        }
    }
}

impl std::fmt::Display for Term {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Term::Main(p) => write!(f, "{}", p.label()),
            Term::Interaction(a, b) => write!(f, "{}:{}", a.label(), b.label()),
        }
    }
}

/// Fixed-effects model specification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Response column.
    pub response: String,
    /// Whether to include an intercept.
    pub intercept: bool,
    /// Terms in order of appearance.
    pub terms: Vec<Term>,
}

impl ModelSpec {
    /// Intercept-only model for `response`.
    pub fn new(response: &str) -> Self {
        Self {
            response: response.to_string(),
            intercept: true,
            terms: Vec::new(),
        }
    }

    /// Drop the intercept.
    pub fn without_intercept(mut self) -> Self {
        self.intercept = false;
        self
    }

    /// Add a main effect.
    pub fn main(mut self, predictor: Predictor) -> Self {
        let term = Term::Main(predictor);
        if !self.terms.contains(&term) {
            self.terms.push(term);
        }
        self
    }

    /// Add an interaction without main effects.
    pub fn interaction(mut self, a: Predictor, b: Predictor) -> Self {
        self.terms.push(Term::Interaction(a, b));
        self
    }

    /// Add both main effects and their interaction.
    pub fn crossed(self, a: Predictor, b: Predictor) -> Self {
        self.main(a.clone()).main(b.clone()).interaction(a, b)
    }

    /// Quantile-bound model: `casi ~ topsub + disp + disp:stime`.
    pub fn extreme_bounds() -> Self {
        Self::new("casi")
            .main(Predictor::factor("topsub"))
            .main(Predictor::factor("disp"))
            .interaction(Predictor::factor("disp"), Predictor::numeric("stime"))
    }

    /// Fixed part of the site model: `casi ~ I(depth/100) + disp * stime`.
    pub fn site_model() -> Self {
        Self::new("casi")
            .main(Predictor::scaled("depth", 100.0))
            .crossed(Predictor::factor("disp"), Predictor::numeric("stime"))
    }

    /// All variables referenced by the terms (without the response).
    pub fn variables(&self) -> Vec<&str> {
        let mut vars: Vec<&str> = self.terms.iter().flat_map(|t| t.variables()).collect();
        vars.sort();
        vars.dedup();
        vars
    }

    /// Whether `name` appears as a main effect.
    pub fn has_main(&self, name: &str) -> bool {
        self.terms
            .iter()
            .any(|t| matches!(t, Term::Main(p) if p.name == name))
    }
}

impl std::fmt::Display for ModelSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut parts: Vec<String> = Vec::new();
        if !self.intercept {
            parts.push("0".to_string());
        }
        parts.extend(self.terms.iter().map(|t| t.to_string()));
        if parts.is_empty() {
            parts.push("1".to_string());
        }
        write!(f, "{} ~ {}", self.response, parts.join(" + "))
    }
}

/// Random intercepts nested from the outermost level inward.
///
/// `levels = ["site", "pid"]` gives one intercept per site and one per
/// profile within site (grouping key `site:pid`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NestedRandomEffects {
    pub levels: Vec<String>,
}

impl NestedRandomEffects {
    pub fn new(levels: &[&str]) -> Self {
        Self {
            levels: levels.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Site and profile-within-site.
    pub fn site_profile() -> Self {
        Self::new(&["site", "pid"])
    }

    /// Name of nesting level `k` (`site`, `site:pid`).
    pub fn group_label(&self, k: usize) -> String {
        self.levels[..=k].join(":")
    }

    pub fn n_levels(&self) -> usize {
        self.levels.len()
    }
}

impl std::fmt::Display for NestedRandomEffects {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "(1 | {})", self.levels.join("/"))
    }
}

/// Fixed effects plus nested random intercepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixedModelSpec {
    pub fixed: ModelSpec,
    pub random: NestedRandomEffects,
}

impl MixedModelSpec {
    /// `casi ~ I(depth/100) + disp * stime + (1 | site/pid)`.
    pub fn site_model() -> Self {
        Self {
            fixed: ModelSpec::site_model(),
            random: NestedRandomEffects::site_profile(),
        }
    }
}

impl std::fmt::Display for MixedModelSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} + {}", self.fixed, self.random)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extreme_bounds_spec() {
        let spec = ModelSpec::extreme_bounds();
        assert!(spec.intercept);
        assert_eq!(spec.terms.len(), 3);
        assert!(spec.has_main("disp"));
        assert!(!spec.has_main("stime"));
        assert_eq!(spec.variables(), vec!["disp", "stime", "topsub"]);
    }

    #[test]
    fn test_site_model_display() {
        let spec = MixedModelSpec::site_model();
        assert_eq!(
            spec.to_string(),
            "casi ~ I(depth/100) + disp + stime + disp:stime + (1 | site/pid)"
        );
    }

    #[test]
    fn test_crossed_does_not_duplicate_mains() {
        let spec = ModelSpec::new("y")
            .main(Predictor::factor("a"))
            .crossed(Predictor::factor("a"), Predictor::numeric("b"));
        assert_eq!(spec.terms.len(), 3);
    }

    #[test]
    fn test_nested_group_labels() {
        let re = NestedRandomEffects::site_profile();
        assert_eq!(re.group_label(0), "site");
        assert_eq!(re.group_label(1), "site:pid");
        assert_eq!(re.to_string(), "(1 | site/pid)");
    }

    #[test]
    fn test_intercept_only_display() {
        assert_eq!(ModelSpec::new("casi").to_string(), "casi ~ 1");
        assert_eq!(
            ModelSpec::new("casi")
                .without_intercept()
                .main(Predictor::factor("disp"))
                .to_string(),
            "casi ~ 0 + disp"
        );
    }
}
