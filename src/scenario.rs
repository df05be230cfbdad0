// NETBENCH SCENARIOS
// A SCENARIO SWEEPS ONE FIELD OF A BASE PARAMETER SET ACROSS A LIST OF VALUES,
// FOR EACH IMPLEMENTATION UNDER COMPARISON. EXPANSION PRODUCES ONE RUN PLAN PER
// (IMPLEMENTATION, VALUE) PAIR: IMPLEMENTATIONS OUTER, VALUES INNER.
//
// LINKAGES DERIVE DEPENDENT FIELDS. ALL LINKAGES OF A RUN SEE THE SAME SNAPSHOT
// (BASE + SWEPT VALUE), NEVER EACH OTHER'S OUTPUT, SO THEIR ORDER IS UNOBSERVABLE.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::expr::Formula;
use crate::layout::{format_value, run_dir_name};
use crate::params::ParameterSet;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    #[default]
    #[serde(rename = "receiver-client", alias = "receiver")]
    ReceiverClient,
    #[serde(rename = "pingpong")]
    Pingpong,
}

impl Mode {
    pub fn label(self) -> &'static str {
        match self {
            Self::ReceiverClient => "receiver-client",
            Self::Pingpong => "pingpong",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

pub type LinkFn = fn(&ParameterSet) -> f64;

/// Derivation rule for one dependent field.
#[derive(Clone, Debug)]
pub enum Linkage {
    /// Formula text, parsed up front. Used by scenario files.
    Formula(Formula),
    /// Pure function of the run's parameter set. `name` is only used for provenance.
    Func { name: &'static str, f: LinkFn },
}

impl Linkage {
    pub fn formula(src: &str) -> Result<Self> {
        Formula::parse(src).map(Self::Formula)
    }

    pub fn func(name: &'static str, f: LinkFn) -> Self {
        Self::Func { name, f }
    }

    pub fn eval(&self, snapshot: &ParameterSet, var: (&str, f64)) -> Result<f64> {
        match self {
            Self::Formula(formula) => formula.eval(snapshot, Some(var)),
            Self::Func { f, .. } => Ok(f(snapshot)),
        }
    }

    // OPAQUE TOKEN FOR scenario.json. NEVER PARSED BACK.
    pub fn token(&self) -> String {
        match self {
            Self::Formula(formula) => formula.source().to_string(),
            Self::Func { name, .. } => format!("<fn {}>", name),
        }
    }
}

#[derive(Clone, Debug)]
pub struct RunPlan {
    pub implementation: String,
    pub value: f64,
    pub params: ParameterSet,
}

#[derive(Clone, Debug)]
pub struct Scenario {
    name: String,
    title: Option<String>,
    base: ParameterSet,
    var_key: String,
    var_values: Vec<f64>,
    implementations: Vec<String>,
    mode: Mode,
    impl_extra: BTreeMap<String, Vec<String>>,
    linkages: Vec<(String, Linkage)>,
}

impl Scenario {
    pub fn new(name: &str, var_key: &str) -> Self {
        Self {
            name: name.to_string(),
            title: None,
            base: ParameterSet::default(),
            var_key: var_key.to_string(),
            var_values: Vec::new(),
            implementations: Vec::new(),
            mode: Mode::ReceiverClient,
            impl_extra: BTreeMap::new(),
            linkages: Vec::new(),
        }
    }

    pub fn title(mut self, title: &str) -> Self {
        self.title = Some(title.to_string());
        self
    }

    pub fn base(mut self, base: ParameterSet) -> Self {
        self.base = base;
        self
    }

    pub fn values(mut self, values: impl IntoIterator<Item = f64>) -> Self {
        self.var_values = values.into_iter().collect();
        self
    }

    pub fn implementations<S: Into<String>>(mut self, impls: impl IntoIterator<Item = S>) -> Self {
        self.implementations = impls.into_iter().map(Into::into).collect();
        self
    }

    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn impl_extra(mut self, implementation: &str, args: &[&str]) -> Self {
        self.impl_extra
            .entry(implementation.to_string())
            .or_default()
            .extend(args.iter().map(|a| a.to_string()));
        self
    }

    // A LATER LINKAGE FOR THE SAME TARGET REPLACES THE EARLIER ONE
    pub fn link(mut self, target: &str, linkage: Linkage) -> Self {
        self.linkages.retain(|(t, _)| t != target);
        self.linkages.push((target.to_string(), linkage));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.name)
    }

    pub fn raw_title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn fixed(&self) -> &ParameterSet {
        &self.base
    }

    pub fn var_key(&self) -> &str {
        &self.var_key
    }

    pub fn var_values(&self) -> &[f64] {
        &self.var_values
    }

    pub fn implementation_list(&self) -> &[String] {
        &self.implementations
    }

    pub fn run_mode(&self) -> Mode {
        self.mode
    }

    pub fn extra_args(&self, implementation: &str) -> &[String] {
        self.impl_extra
            .get(implementation)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn all_extra_args(&self) -> &BTreeMap<String, Vec<String>> {
        &self.impl_extra
    }

    pub fn linkages(&self) -> &[(String, Linkage)] {
        &self.linkages
    }

    // LAYERED REBUILD HELPERS: RETURN A NEW SCENARIO, NEVER MUTATE IN PLACE
    pub fn with_base(&self, base: ParameterSet) -> Self {
        self.clone().base(base)
    }

    pub fn with_values(&self, values: Vec<f64>) -> Self {
        self.clone().values(values)
    }

    pub fn with_implementations(&self, impls: Vec<String>) -> Self {
        self.clone().implementations(impls)
    }

    fn invalid(&self, reason: impl Into<String>) -> Error {
        Error::InvalidScenario {
            name: self.name.clone(),
            reason: reason.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.base.contains(&self.var_key) {
            return Err(Error::UnknownField(self.var_key.clone()));
        }
        if self.var_values.is_empty() {
            return Err(self.invalid("var_values is empty"));
        }
        if let Some(v) = self.var_values.iter().find(|v| !v.is_finite()) {
            return Err(self.invalid(format!("sweep value {} is not finite", v)));
        }
        // TWO VALUES SHARING A RUN DIRECTORY WOULD OVERWRITE EACH OTHER'S RESULTS
        let mut dirs = BTreeSet::new();
        for &v in &self.var_values {
            let dir = run_dir_name(&self.var_key, v);
            if !dirs.insert(dir.clone()) {
                return Err(self.invalid(format!("sweep values collide on run directory '{}'", dir)));
            }
        }
        if self.implementations.is_empty() {
            return Err(self.invalid("implementations is empty"));
        }
        for (target, _) in &self.linkages {
            if !self.base.contains(target) {
                return Err(Error::UnknownField(target.clone()));
            }
            if *target == self.var_key {
                return Err(self.invalid(format!("linkage overrides the swept field '{}'", target)));
            }
        }
        Ok(())
    }

    // BASE + SWEPT VALUE + LINKAGES FOR ONE VALUE
    pub fn params_for(&self, value: f64) -> Result<ParameterSet> {
        let mut params = self.base.clone();
        params.set_number(&self.var_key, value)?;

        let snapshot = params.clone();
        let derived = self
            .linkages
            .iter()
            .map(|(target, linkage)| {
                linkage
                    .eval(&snapshot, (&self.var_key, value))
                    .map(|v| (target.as_str(), v))
            })
            .collect::<Result<Vec<_>>>()?;

        for (target, v) in derived {
            params.set_number(target, v)?;
        }
        Ok(params)
    }

    pub fn expand(&self) -> Result<Vec<RunPlan>> {
        self.validate()?;
        let mut plans = Vec::with_capacity(self.implementations.len() * self.var_values.len());
        for implementation in &self.implementations {
            for &value in &self.var_values {
                plans.push(RunPlan {
                    implementation: implementation.clone(),
                    value,
                    params: self.params_for(value)?,
                });
            }
        }
        Ok(plans)
    }

    // PROVENANCE TAGS PASSED AS --tag key=value
    pub fn tags(&self, plan: &RunPlan) -> Vec<(String, String)> {
        vec![
            ("scenario".to_string(), self.name.clone()),
            ("impl".to_string(), plan.implementation.clone()),
            (self.var_key.clone(), format_value(plan.value)),
        ]
    }
}
