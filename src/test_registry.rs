//! Marks `MethodRecord`s as test/fixture/setup/teardown by attribute name,
//! and assigns each test a `TestCategory`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::history::HistoryLog;
use crate::method_id::MethodId;
use crate::source::{MethodRecord, SourceIndex, TestFramework};

/// A role an attribute name maps to, from a closed table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeRole {
    Test,
    ParameterizedCase,
    Fixture,
    Setup,
    Teardown,
}

/// `(attribute name, role)`. Matched case-insensitively against every
/// `MethodRecord`'s attribute set.
const ATTRIBUTE_TABLE: &[(&str, AttributeRole)] = &[
    ("test", AttributeRole::Test),
    ("testmethod", AttributeRole::Test),
    ("fact", AttributeRole::Test),
    ("theory", AttributeRole::Test),
    ("testcase", AttributeRole::Test),
    ("datatestmethod", AttributeRole::Test),
    ("testcase", AttributeRole::ParameterizedCase),
    ("inlinedata", AttributeRole::ParameterizedCase),
    ("memberdata", AttributeRole::ParameterizedCase),
    ("testfixture", AttributeRole::Fixture),
    ("testclass", AttributeRole::Fixture),
    ("testsuite", AttributeRole::Fixture),
    ("setup", AttributeRole::Setup),
    ("onetimesetup", AttributeRole::Setup),
    ("testinitialize", AttributeRole::Setup),
    ("classinitialize", AttributeRole::Setup),
    ("teardown", AttributeRole::Teardown),
    ("onetimeteardown", AttributeRole::Teardown),
    ("testcleanup", AttributeRole::Teardown),
    ("classcleanup", AttributeRole::Teardown),
];

fn roles_for(attribute_name: &str) -> Vec<AttributeRole> {
    let lower = attribute_name.to_ascii_lowercase();
    ATTRIBUTE_TABLE.iter().filter(|(name, _)| *name == lower).map(|(_, role)| *role).collect()
}

/// True if any attribute in `attributes` marks the method as a test.
pub fn is_test_attribute_set(attributes: &HashSet<String>) -> bool {
    attributes.iter().any(|a| roles_for(a).contains(&AttributeRole::Test))
}

pub fn has_role(attributes: &HashSet<String>, role: AttributeRole) -> bool {
    attributes.iter().any(|a| roles_for(a).contains(&role))
}

/// Best-effort framework inference from which attribute names are present.
/// NUnit and MSTest/xUnit attribute sets are disjoint by name, so the first
/// match wins; an attribute-free test method (exists only via the "class
/// containing any test method" fixture rule) reports `None`.
pub fn infer_framework(attributes: &HashSet<String>) -> TestFramework {
    for attr in attributes {
        match attr.to_ascii_lowercase().as_str() {
            "test" | "testfixture" | "setup" | "teardown" | "onetimesetup" | "onetimeteardown" => {
                return TestFramework::NUnit;
            }
            "fact" | "theory" | "inlinedata" | "memberdata" => return TestFramework::XUnit,
            "testmethod" | "testclass" | "testinitialize" | "testcleanup" | "classinitialize"
            | "classcleanup" | "datatestmethod" => return TestFramework::MsTest,
            _ => {}
        }
    }
    TestFramework::None
}

/// Spec §3's closed category set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TestCategory {
    Unit,
    Integration,
    Api,
    Database,
    Ui,
    EndToEnd,
    Performance,
    Security,
}

impl TestCategory {
    /// Parses a category name (e.g. from a config file's
    /// `included_categories` set) case-insensitively. Public so the engine
    /// layer can turn string-keyed config options into `TestCategory`
    /// values without duplicating the name table.
    pub fn parse(hint: &str) -> Option<Self> {
        Self::from_hint(hint)
    }

    fn from_hint(hint: &str) -> Option<Self> {
        match hint.to_ascii_lowercase().as_str() {
            "unit" => Some(Self::Unit),
            "integration" => Some(Self::Integration),
            "api" => Some(Self::Api),
            "database" | "db" => Some(Self::Database),
            "ui" => Some(Self::Ui),
            "endtoend" | "e2e" => Some(Self::EndToEnd),
            "performance" | "perf" => Some(Self::Performance),
            "security" | "sec" => Some(Self::Security),
            _ => None,
        }
    }
}

/// Naming-convention fallback classifier: checks the method's declaring
/// type and namespace for a recognizable category keyword.
fn classify_by_naming(record: &MethodRecord) -> TestCategory {
    let haystack = format!("{}.{}", record.display_name, record.source_path.display()).to_ascii_lowercase();
    const PATTERNS: &[(&str, TestCategory)] = &[
        ("endtoend", TestCategory::EndToEnd),
        ("e2e", TestCategory::EndToEnd),
        ("integration", TestCategory::Integration),
        ("database", TestCategory::Database),
        ("api", TestCategory::Api),
        ("ui", TestCategory::Ui),
        ("security", TestCategory::Security),
        ("performance", TestCategory::Performance),
    ];
    for (pattern, category) in PATTERNS {
        if haystack.contains(pattern) {
            return *category;
        }
    }
    TestCategory::Unit
}

/// Assigns a test's category: an explicit `[Category("...")]` hint wins,
/// otherwise naming conventions, otherwise `Unit`.
pub fn classify_category(record: &MethodRecord) -> TestCategory {
    record
        .category_hint
        .as_deref()
        .and_then(TestCategory::from_hint)
        .unwrap_or_else(|| classify_by_naming(record))
}

/// A `MethodRecord` with `is_test = true` plus test-specific fields.
/// `history` is shared with every other `TestRecord` in the registry and
/// with the engine's `HistoryLog`.
#[derive(Debug, Clone)]
pub struct TestRecord {
    pub method: MethodRecord,
    pub category: TestCategory,
    pub tags: HashSet<String>,
    pub avg_execution: Duration,
    pub is_flaky: bool,
    pub last_selected: Option<chrono::DateTime<chrono::Utc>>,
    pub history: Arc<HistoryLog>,
}

impl TestRecord {
    pub fn id(&self) -> &MethodId {
        &self.method.id
    }
}

/// Immutable, built-once collection of every discovered `TestRecord`.
#[derive(Debug, Default)]
pub struct TestRegistry {
    tests: HashMap<MethodId, TestRecord>,
    /// Types that contain at least one test method, treated as fixtures
    /// even without an explicit `[TestFixture]`-style attribute.
    fixture_types: HashSet<String>,
}

impl TestRegistry {
    pub fn build(index: &SourceIndex, history: Arc<HistoryLog>) -> Self {
        let mut tests = HashMap::new();
        let mut fixture_types = HashSet::new();

        for record in index.records() {
            if !record.is_test {
                continue;
            }
            fixture_types.insert(record.declaring_type.clone());

            let (avg_execution, is_flaky) = history.rolling_stats(&record.id);
            let tags = record.attributes.clone();
            let category = classify_category(record);

            tests.insert(
                record.id.clone(),
                TestRecord {
                    method: record.clone(),
                    category,
                    tags,
                    avg_execution,
                    is_flaky,
                    last_selected: None,
                    history: Arc::clone(&history),
                },
            );
        }

        // A type explicitly decorated `[TestFixture]`/`[TestClass]` etc. is
        // a fixture even before it has any test method recognized (e.g. a
        // base fixture class); fold those in too.
        for t in index.records() {
            if has_role(&t.attributes, AttributeRole::Fixture) {
                fixture_types.insert(t.declaring_type.clone());
            }
        }

        Self { tests, fixture_types }
    }

    pub fn get(&self, id: &MethodId) -> Option<&TestRecord> {
        self.tests.get(id)
    }

    pub fn tests(&self) -> impl Iterator<Item = &TestRecord> {
        self.tests.values()
    }

    pub fn len(&self) -> usize {
        self.tests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    pub fn is_fixture_type(&self, declaring_type: &str) -> bool {
        self.fixture_types.contains(declaring_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn record(name: &str, declaring_type: &str, attributes: &[&str]) -> MethodRecord {
        MethodRecord {
            id: MethodId::build("Acme", declaring_type, name, &[]),
            display_name: format!("{declaring_type}.{name}"),
            declaring_type: declaring_type.to_string(),
            source_path: PathBuf::from("Foo.cs"),
            start_line: 1,
            end_line: 2,
            is_test: is_test_attribute_set(&attributes.iter().map(|s| s.to_string()).collect()),
            framework: infer_framework(&attributes.iter().map(|s| s.to_string()).collect()),
            attributes: attributes.iter().map(|s| s.to_string()).collect(),
            framework_version_tag: None,
            category_hint: None,
        }
    }

    #[test]
    fn recognizes_test_attributes_case_insensitively() {
        let attrs: HashSet<String> = ["fact".to_string()].into_iter().collect();
        assert!(is_test_attribute_set(&attrs));
        assert_eq!(infer_framework(&attrs), TestFramework::XUnit);
    }

    #[test]
    fn classifies_category_from_explicit_hint() {
        let mut r = record("Checkout", "OrderTests", &["Test"]);
        r.category_hint = Some("Integration".to_string());
        assert_eq!(classify_category(&r), TestCategory::Integration);
    }

    #[test]
    fn classifies_category_from_naming_convention() {
        let r = record("Login", "UiSmokeTests", &["Test"]);
        assert_eq!(classify_category(&r), TestCategory::Ui);
    }

    #[test]
    fn falls_back_to_unit_category() {
        let r = record("ComputesTotal", "CalculatorTests", &["Test"]);
        assert_eq!(classify_category(&r), TestCategory::Unit);
    }

    #[test]
    fn fixture_without_attribute_still_recognized() {
        let m = record("ComputesTotal", "CalculatorTests", &["Test"]);
        let index = SourceIndex::from_records(vec![m]);

        let history = Arc::new(HistoryLog::new());
        let registry = TestRegistry::build(&index, history);
        assert!(registry.is_fixture_type("CalculatorTests"));
    }
}
