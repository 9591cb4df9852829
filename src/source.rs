//! `SourceIndex`: parses a solution into `MethodRecord`s and assembles the
//! `CallGraph` from resolved invocation sites.
//!
//! Heuristic, lexical, non-compiling by design (see `source::parser`). No
//! project that fails to read contributes nodes or edges; the failure is
//! recorded as a warning and the build continues.

pub mod callgraph;
pub mod parser;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::cancel::CancellationToken;
use crate::config::{ProjectDescriptor, SolutionDescriptor};
use crate::error::{EngineResult, Warning, WithWarnings};
use crate::method_id::MethodId;

pub use callgraph::CallGraph;

/// The framework a test method is written against, carried on every
/// `MethodRecord`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestFramework {
    NUnit,
    XUnit,
    MsTest,
    None,
}

/// One parsed method declaration.
///
/// Line range covers the full method body, used by `ChangeResolver` to map
/// diff hunks back onto methods.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodRecord {
    pub id: MethodId,
    pub display_name: String,
    pub declaring_type: String,
    pub source_path: PathBuf,
    pub start_line: u32,
    pub end_line: u32,
    pub is_test: bool,
    pub framework: TestFramework,
    pub attributes: HashSet<String>,
    pub framework_version_tag: Option<String>,
    /// The argument of a `[Category("...")]`-style attribute, if present.
    /// Carried alongside the raw `attributes` set so `TestRegistry`'s
    /// category classifier can use an explicit hint instead of guessing
    /// from naming conventions alone.
    pub category_hint: Option<String>,
}

impl MethodRecord {
    pub fn contains_line(&self, line: u32) -> bool {
        self.start_line <= line && line <= self.end_line
    }

    pub fn overlaps(&self, start: u32, end: u32) -> bool {
        self.start_line <= end && start <= self.end_line
    }
}

/// Pluggable collaborator for resolving call sites against compiled
/// assemblies rather than lexical heuristics alone. The lexical scanner in
/// `parser` never needs one to function; an implementor could sharpen
/// overload resolution by consulting reflection data.
pub trait AssemblyLoader: Send + Sync {
    /// Returns the set of fully-qualified type names a loader knows about
    /// for `assembly_path`, or `None` if the assembly couldn't be loaded.
    fn known_types(&self, assembly_path: &Path) -> Option<HashSet<String>>;
}

/// The out-of-the-box `AssemblyLoader`: knows nothing, so `SourceIndex`
/// stays a pure lexical analyzer with no assembly dependency. A
/// collaborator trait with a usable default, so callers that don't need
/// reflection-backed resolution never have to implement one.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAssemblyLoader;

impl AssemblyLoader for NullAssemblyLoader {
    fn known_types(&self, _assembly_path: &Path) -> Option<HashSet<String>> {
        None
    }
}

/// Parsed, immutable view over a solution: every `MethodRecord` plus a
/// by-file index sorted by `start_line` for `ChangeResolver`'s hunk lookup.
#[derive(Debug, Default)]
pub struct SourceIndex {
    records: HashMap<MethodId, MethodRecord>,
    by_file: HashMap<PathBuf, Vec<MethodId>>,
}

impl SourceIndex {
    /// Builds an index directly from already-constructed records, bypassing
    /// the parser. Used by tests across the crate (coverage, change
    /// resolution, scoring) that need a known, hand-built graph/index
    /// without round-tripping through source text.
    pub fn from_records(records: impl IntoIterator<Item = MethodRecord>) -> Self {
        let mut index = Self::default();
        for record in records {
            index.by_file.entry(record.source_path.clone()).or_default().push(record.id.clone());
            index.records.insert(record.id.clone(), record);
        }
        for methods in index.by_file.values_mut() {
            methods.sort_by_key(|id| index.records.get(id).map(|m| m.start_line).unwrap_or(0));
        }
        index
    }

    pub fn get(&self, id: &MethodId) -> Option<&MethodRecord> {
        self.records.get(id)
    }

    pub fn records(&self) -> impl Iterator<Item = &MethodRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Methods declared in `path`, ordered by `start_line` ascending.
    pub fn methods_in_file(&self, path: &Path) -> &[MethodId] {
        self.by_file.get(path).map(Vec::as_slice).unwrap_or(&[])
    }

    /// All methods declared on `declaring_type` in this solution
    /// (qualified `Type` or `Outer+Inner` nesting form).
    pub fn methods_of_type<'a>(&'a self, declaring_type: &'a str) -> impl Iterator<Item = &'a MethodRecord> {
        self.records.values().filter(move |m| m.declaring_type == declaring_type)
    }
}

struct ParsedProject {
    methods: Vec<parser::DraftMethod>,
    types: Vec<parser::DraftType>,
    source_path_of: HashMap<usize, PathBuf>,
    using_namespaces: Vec<String>,
    framework_tag: Option<String>,
}

/// Parses `solution` and builds the `CallGraph` in one pass.
///
/// Suspension points: after each project finishes parsing (inter-project
/// boundary) and after each file is read (parse-file boundary).
pub fn build(
    solution: &SolutionDescriptor,
    cancel: &CancellationToken,
) -> EngineResult<WithWarnings<(SourceIndex, CallGraph)>> {
    let mut warnings = Vec::new();

    let parsed_projects: Vec<(usize, EngineResult<ParsedProject>)> = solution
        .projects
        .par_iter()
        .enumerate()
        .map(|(i, project)| (i, parse_project(project, cancel)))
        .collect();

    let mut projects = Vec::with_capacity(parsed_projects.len());
    for (i, result) in parsed_projects {
        cancel.check()?;
        match result {
            Ok(parsed) => projects.push(parsed),
            Err(err) => {
                warnings.push(Warning::ParseFailure {
                    project: solution.projects[i].path.display().to_string(),
                    details: err.to_string(),
                });
            }
        }
    }

    let (index, unresolved) = assemble_records(&projects);
    let mut graph = CallGraph::new();
    for id in index.records.keys() {
        graph.add_vertex(id.clone());
    }

    resolve_calls(&projects, &index, &mut graph, &mut warnings);
    warnings.extend(unresolved);

    Ok(WithWarnings::with_warnings((index, graph), warnings))
}

fn parse_project(project: &ProjectDescriptor, cancel: &CancellationToken) -> EngineResult<ParsedProject> {
    let mut methods = Vec::new();
    let mut types = Vec::new();
    let mut source_path_of = HashMap::new();
    let mut using_namespaces = Vec::new();

    for source_file in &project.source_files {
        cancel.check()?;
        let content = std::fs::read_to_string(source_file)?;
        let file_result = parser::parse_file(&content);

        for method in file_result.methods {
            source_path_of.insert(methods.len(), source_file.clone());
            methods.push(method);
        }
        types.extend(file_result.types);
        using_namespaces.extend(file_result.using_namespaces);
    }

    Ok(ParsedProject {
        methods,
        types,
        source_path_of,
        using_namespaces,
        framework_tag: project.framework_tag.clone(),
    })
}

/// Builds every `MethodId`/`MethodRecord` from the draft methods collected
/// across all projects. Overload resolution within a type is best-effort:
/// when two methods share a name but differ in parameter count/types, each
/// gets a distinct `MethodId` (the canonical grammar already disambiguates
/// on param types); same-name-same-arity collisions (rare, since C# allows
/// it only with differing types our lexer may not always have fully
/// resolved) keep the first declaration and the rest become warnings.
fn assemble_records(projects: &[ParsedProject]) -> (SourceIndex, Vec<Warning>) {
    let mut index = SourceIndex::default();
    let mut warnings = Vec::new();

    for project in projects {
        for (i, draft) in project.methods.iter().enumerate() {
            let source_path = project.source_path_of.get(&i).cloned().unwrap_or_default();
            let id = MethodId::build(&draft.namespace, &draft.declaring_type, &draft.method_name, &draft.param_types);

            if index.records.contains_key(&id) {
                warnings.push(Warning::ParseFailure {
                    project: source_path.display().to_string(),
                    details: format!("duplicate method signature ignored: {}", id),
                });
                continue;
            }

            let attribute_names: HashSet<String> =
                draft.attributes.iter().map(|a| a.name.clone()).collect();
            let is_test = crate::test_registry::is_test_attribute_set(&attribute_names);
            let framework = crate::test_registry::infer_framework(&attribute_names);
            let category_hint = draft
                .attributes
                .iter()
                .find(|a| a.name == "Category" && !a.args.is_empty())
                .map(|a| a.args[0].trim_matches(|c| c == '"' || c == '\'').to_string());

            let record = MethodRecord {
                id: id.clone(),
                display_name: format!("{}.{}", draft.declaring_type.replace('+', "."), draft.method_name),
                declaring_type: draft.declaring_type.clone(),
                source_path: source_path.clone(),
                start_line: draft.start_line,
                end_line: draft.end_line,
                is_test,
                framework,
                attributes: attribute_names,
                framework_version_tag: project.framework_tag.clone(),
                category_hint,
            };

            index.by_file.entry(source_path).or_default().push(id.clone());
            index.records.insert(id, record);
        }
    }

    for methods in index.by_file.values_mut() {
        methods.sort_by_key(|id| index.records.get(id).map(|m| m.start_line).unwrap_or(0));
    }

    (index, warnings)
}

/// Second pass: scans every method body for call sites and resolves them
/// against the global symbol table built in `assemble_records`, emitting
/// edges (including virtual-dispatch fan-out) into `graph`.
fn resolve_calls(projects: &[ParsedProject], index: &SourceIndex, graph: &mut CallGraph, warnings: &mut Vec<Warning>) {
    let type_info = build_type_info(projects);
    let overrides = build_override_index(&type_info, index);

    for project in projects {
        for (i, draft) in project.methods.iter().enumerate() {
            let caller_id =
                MethodId::build(&draft.namespace, &draft.declaring_type, &draft.method_name, &draft.param_types);
            if !index.records.contains_key(&caller_id) {
                continue;
            }
            let source_path = project.source_path_of.get(&i).cloned().unwrap_or_default();

            for (qualifier, callee_name) in parser::find_call_sites(&draft.body) {
                match resolve_call_target(&qualifier, &callee_name, draft, index, &type_info, &project.using_namespaces) {
                    Some(callee_id) => {
                        graph.add_edge(caller_id.clone(), callee_id.clone());
                        if let Some(override_ids) = overrides.get(&callee_id) {
                            for ov in override_ids {
                                graph.add_edge(caller_id.clone(), ov.clone());
                            }
                        }
                    }
                    None => {
                        warnings.push(Warning::UnresolvedReference {
                            method: format!("{}.{}", draft.declaring_type, callee_name),
                            site: source_path.clone(),
                        });
                    }
                }
            }
        }
    }
}

struct TypeInfo {
    namespace: String,
    base_types: Vec<String>,
    #[allow(dead_code)]
    is_interface: bool,
}

fn build_type_info(projects: &[ParsedProject]) -> HashMap<String, TypeInfo> {
    let mut map = HashMap::new();
    for project in projects {
        for t in &project.types {
            map.insert(
                t.name.clone(),
                TypeInfo { namespace: t.namespace.clone(), base_types: t.base_types.clone(), is_interface: t.is_interface },
            );
        }
    }
    map
}

/// For every virtual/abstract method, the set of override `MethodId`s
/// declared on types transitively derived from its declaring type. An edge
/// is emitted from a call site both to the base method and to every known
/// override.
fn build_override_index(type_info: &HashMap<String, TypeInfo>, index: &SourceIndex) -> HashMap<MethodId, Vec<MethodId>> {
    let mut overrides: HashMap<MethodId, Vec<MethodId>> = HashMap::new();

    let mut subtypes_of: HashMap<&str, Vec<&str>> = HashMap::new();
    for (name, info) in type_info {
        for base in &info.base_types {
            subtypes_of.entry(base.as_str()).or_default().push(name.as_str());
        }
    }

    let virtual_methods: Vec<&MethodRecord> = index
        .records
        .values()
        .filter(|m| {
            // A method is a dispatch target if declared on an interface, or
            // if some other declared method on a subtype shares its name
            // (override heuristic: exact name match across the hierarchy).
            subtypes_of.contains_key(m.declaring_type.as_str())
        })
        .collect();

    for base_method in virtual_methods {
        let Some(subtypes) = subtypes_of.get(base_method.declaring_type.as_str()) else { continue };
        let mut found = Vec::new();
        for subtype in subtypes {
            for candidate in index.methods_of_type(subtype) {
                if candidate.declaring_type == *subtype && method_name_of(candidate) == method_name_of(base_method) {
                    found.push(candidate.id.clone());
                }
            }
        }
        if !found.is_empty() {
            overrides.insert(base_method.id.clone(), found);
        }
    }

    overrides
}

fn method_name_of(record: &MethodRecord) -> &str {
    record.display_name.rsplit('.').next().unwrap_or(&record.display_name)
}

/// Resolves a call-site `(qualifier, name)` pair to a `MethodId`.
///
/// Resolution order: (1) a method of the same name on the caller's own
/// declaring type or one of its known base types; (2) if qualified, a type
/// whose fully-qualified name matches the qualifier through an imported
/// `using` namespace; (3) a permissive fallback matching the qualifier
/// against any type of that short name, for same-namespace references and
/// nested types a `using` directive wouldn't apply to. Step (2) is tried
/// before the permissive step (3) so an imported namespace wins over an
/// unrelated type that happens to share the short name. Overload
/// disambiguation prefers the candidate whose parameter count matches the
/// call site's; without an argument-count hint from the lexer (calls are
/// matched by name only), the first candidate by declaration order wins —
/// a known heuristic limitation of a non-compiling resolver.
fn resolve_call_target(
    qualifier: &Option<String>,
    callee_name: &str,
    caller: &parser::DraftMethod,
    index: &SourceIndex,
    type_info: &HashMap<String, TypeInfo>,
    using_namespaces: &[String],
) -> Option<MethodId> {
    if qualifier.is_none() {
        if let Some(id) = find_method_on_type_or_bases(&caller.declaring_type, callee_name, index, type_info) {
            return Some(id);
        }
    }

    // Try the qualifier as a short type name resolved through `using`
    // namespaces: `Helper.DoWork()` where `Helper` lives in a namespace
    // this file imports. Requires the candidate's own fully-qualified type
    // (`MethodId::declaring_type`, namespace included) to match
    // `{ns}.{qualifier_name}` for some imported `ns` — so it only fires for
    // a type this file actually brought into scope via `using`, not any
    // type sharing the short name.
    if let Some(qualifier_name) = qualifier {
        for ns in using_namespaces {
            let candidate = format!("{ns}.{qualifier_name}");
            if let Some(id) = index
                .records
                .values()
                .find(|m| m.id.declaring_type() == Some(candidate.as_str()) && method_name_of(m) == callee_name)
            {
                return Some(id.id.clone());
            }
        }
    }

    // Permissive fallback: any type of that short name, regardless of
    // namespace or `using` directives.
    let candidate_type = qualifier.clone().unwrap_or_else(|| caller.declaring_type.clone());
    find_method_on_type_or_bases(&candidate_type, callee_name, index, type_info)
}

fn find_method_on_type_or_bases(
    type_name: &str,
    method_name: &str,
    index: &SourceIndex,
    type_info: &HashMap<String, TypeInfo>,
) -> Option<MethodId> {
    let mut visited = HashSet::new();
    let mut frontier = vec![type_name.to_string()];

    while let Some(current) = frontier.pop() {
        if !visited.insert(current.clone()) {
            continue;
        }
        if let Some(found) = index.methods_of_type(&current).find(|m| method_name_of(m) == method_name) {
            return Some(found.id.clone());
        }
        if let Some(info) = type_info.get(&current) {
            frontier.extend(info.base_types.iter().cloned());
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(dir: &tempfile::TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn builds_index_and_direct_call_edge() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_temp(
            &dir,
            "Calc.cs",
            r#"
            namespace Acme.Math {
                public class Calculator {
                    public int Add(int a, int b) {
                        return Helper(a, b);
                    }
                    private int Helper(int a, int b) => a + b;
                }
            }
            "#,
        );

        let solution = SolutionDescriptor {
            projects: vec![ProjectDescriptor {
                path: PathBuf::from("Acme.csproj"),
                framework_tag: Some("net8.0".to_string()),
                source_files: vec![path],
                references: vec![],
            }],
        };

        let cancel = CancellationToken::new();
        let result = build(&solution, &cancel).unwrap();
        let (index, graph) = result.value;

        assert_eq!(index.len(), 2);
        let add_id = index.records().find(|m| m.display_name.ends_with("Add")).unwrap().id.clone();
        let helper_id = index.records().find(|m| m.display_name.ends_with("Helper")).unwrap().id.clone();
        assert_eq!(graph.succ(&add_id), vec![helper_id]);
    }

    #[test]
    fn unparseable_project_produces_warning_not_failure() {
        let solution = SolutionDescriptor {
            projects: vec![ProjectDescriptor {
                path: PathBuf::from("Missing.csproj"),
                framework_tag: None,
                source_files: vec![PathBuf::from("/nonexistent/File.cs")],
                references: vec![],
            }],
        };
        let cancel = CancellationToken::new();
        let result = build(&solution, &cancel).unwrap();
        assert!(result.value.0.is_empty());
        assert!(!result.warnings.is_empty());
    }

    #[test]
    fn virtual_override_calls_fan_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_temp(
            &dir,
            "Shapes.cs",
            r#"
            namespace Acme.Shapes {
                public abstract class Shape {
                    public abstract double Area();
                }
                public class Circle : Shape {
                    public override double Area() => 0.0;
                }
                public class Caller {
                    public void Describe(Shape s) {
                        Shape.Area();
                    }
                }
            }
            "#,
        );
        let solution = SolutionDescriptor {
            projects: vec![ProjectDescriptor {
                path: PathBuf::from("Acme.csproj"),
                framework_tag: None,
                source_files: vec![path],
                references: vec![],
            }],
        };
        let cancel = CancellationToken::new();
        let result = build(&solution, &cancel).unwrap();
        let (index, graph) = result.value;

        let describe_id = index.records().find(|m| m.display_name.ends_with("Describe")).unwrap().id.clone();
        let circle_area_id = index.records().find(|m| m.declaring_type == "Circle").unwrap().id.clone();
        assert!(graph.succ(&describe_id).contains(&circle_area_id));
    }

    #[test]
    fn using_directive_resolves_the_imported_namespace_over_an_unrelated_same_name_type() {
        let dir = tempfile::tempdir().unwrap();
        let imported = write_temp(
            &dir,
            "AcmeUtils.cs",
            r#"
            namespace Acme.Utils {
                public class Helper {
                    public static void DoWork() {}
                }
            }
            "#,
        );
        let unrelated = write_temp(
            &dir,
            "OtherUtils.cs",
            r#"
            namespace Other.Utils {
                public class Helper {
                    public static void DoWork() {}
                }
            }
            "#,
        );
        let caller = write_temp(
            &dir,
            "App.cs",
            r#"
            using Acme.Utils;
            namespace Acme.App {
                public class Caller {
                    public void Run() {
                        Helper.DoWork();
                    }
                }
            }
            "#,
        );

        let solution = SolutionDescriptor {
            projects: vec![ProjectDescriptor {
                path: PathBuf::from("Acme.csproj"),
                framework_tag: None,
                source_files: vec![imported, unrelated, caller],
                references: vec![],
            }],
        };
        let cancel = CancellationToken::new();
        let result = build(&solution, &cancel).unwrap();
        let (index, graph) = result.value;

        let run_id = index.records().find(|m| m.display_name.ends_with("Run")).unwrap().id.clone();
        let imported_do_work = index
            .records()
            .find(|m| m.id.declaring_type() == Some("Acme.Utils.Helper"))
            .unwrap()
            .id
            .clone();
        let unrelated_do_work = index
            .records()
            .find(|m| m.id.declaring_type() == Some("Other.Utils.Helper"))
            .unwrap()
            .id
            .clone();

        let callees = graph.succ(&run_id);
        assert!(callees.contains(&imported_do_work));
        assert!(!callees.contains(&unrelated_do_work));
    }
}
