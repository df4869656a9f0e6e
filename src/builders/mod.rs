// This file is the module declaration file for the `builders` module.
// It declares and makes public the building blocks the pipeline and the
// command layer are assembled from.

// The `pub mod patterns;` declaration exposes the `patterns` module.
//
// `patterns` module:
// Defines `PatternRule` (include/exclude globs, recursion flag, rename
// template), the `PatternMatcher` trait and the globset-backed
// `GlobMatcher` that expands rules over a directory tree.
pub mod patterns;

// The `pub mod reporter;` declaration exposes the `reporter` module.
//
// `reporter` module:
// Defines the `StatusReporter` trait and its `ConsoleReporter`
// implementation, which lists the pairs of a file set and a summary.
pub mod reporter;

// The `pub mod sets;` declaration exposes the `sets` module.
//
// `sets` module:
// Named set definitions. The `SetProvider` trait resolves a name to its
// rules; implementations read them from the configuration, from a directory
// of TOML/JSON/YAML files, or from a chain of both.
pub mod sets;

// The `pub mod validator;` declaration exposes the `validator` module.
//
// `validator` module:
// `ConfigValidator` and `StandardValidator`, which report unknown
// placeholders, broken globs, conflicting rules and dangling artifacts.
pub mod validator;
