use chrono::NaiveDate;

use crate::align::{EntityMeta, WideTable};

/// How a variant family selects lineage columns. Fragment rules match by
/// substring containment against the column label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FamilyRule {
    ExactMatch(String),
    PrefixMatch(String),
    PrefixMatchPlusExtra { fragment: String, extra: String },
}

impl FamilyRule {
    pub fn matches(&self, label: &str) -> bool {
        match self {
            FamilyRule::ExactMatch(name) => label == name,
            FamilyRule::PrefixMatch(fragment) => label.contains(fragment.as_str()),
            FamilyRule::PrefixMatchPlusExtra { fragment, extra } => {
                label.contains(fragment.as_str()) || label == extra
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct NamedFamilyRule {
    pub family: String,
    pub rule: FamilyRule,
}

impl NamedFamilyRule {
    pub fn new(family: impl Into<String>, rule: FamilyRule) -> Self {
        Self {
            family: family.into(),
            rule,
        }
    }
}

/// The WHO family rules this pipeline ships with. Delta needs the extra
/// member because B.1.617.2 predates the AY.* renaming.
pub fn stock_rules() -> Vec<NamedFamilyRule> {
    vec![
        NamedFamilyRule::new(
            "Alpha",
            FamilyRule::ExactMatch("prevalence_gaussian5_b.1.1.7".to_string()),
        ),
        NamedFamilyRule::new("Beta", FamilyRule::PrefixMatch("_b.1.351".to_string())),
        NamedFamilyRule::new("Gamma", FamilyRule::PrefixMatch("_p.1".to_string())),
        NamedFamilyRule::new(
            "Delta",
            FamilyRule::PrefixMatchPlusExtra {
                fragment: "_ay.".to_string(),
                extra: "prevalence_gaussian5_b.1.617.2".to_string(),
            },
        ),
    ]
}

#[derive(Debug, Clone)]
pub struct FamilyColumn {
    pub family: String,
    pub totals: Vec<f64>,
}

/// Narrow projection of a wide table: one summed column per family rule.
#[derive(Debug, Clone)]
pub struct VariantFamilyTable {
    meta: EntityMeta,
    dates: Vec<NaiveDate>,
    columns: Vec<FamilyColumn>,
}

impl VariantFamilyTable {
    pub fn meta(&self) -> &EntityMeta {
        &self.meta
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn columns(&self) -> &[FamilyColumn] {
        &self.columns
    }
}

/// Collapses lineage columns into family totals. Column selection runs
/// against the table's current registry on every call; null cells count as
/// zero and a rule matching nothing yields an all-zero column.
pub fn aggregate(table: &WideTable, rules: &[NamedFamilyRule]) -> VariantFamilyTable {
    let rows = table.spine().len();
    let mut columns = Vec::with_capacity(rules.len());
    for named in rules {
        let mut totals = vec![0.0; rows];
        for column in table.columns() {
            if !named.rule.matches(&column.label) {
                continue;
            }
            for (total, value) in totals.iter_mut().zip(&column.values) {
                *total += value.unwrap_or(0.0);
            }
        }
        columns.push(FamilyColumn {
            family: named.family.clone(),
            totals,
        });
    }
    VariantFamilyTable {
        meta: table.meta().clone(),
        dates: table.spine().dates().collect(),
        columns,
    }
}
