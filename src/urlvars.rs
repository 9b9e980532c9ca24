/*
 * librepo-rs - client library for fetching RPM-style package repositories.
 * Copyright (C) 2025  librepo-rs contributors
 *
 * This library is free software; you can redistribute it and/or modify
 * it under the terms of the GNU Lesser General Public License as published
 * by the Free Software Foundation; either version 2.1 of the License, or
 * (at your option) any later version.
 */

//! URL-variable substitutor: `$name` / `${name}` expansion (§4.E).

/// An ordered `(name, value)` mapping. Order matters when names overlap as
/// prefixes of one another — the first matching entry wins, mirroring the
/// reference implementation's linked-list walk.
#[derive(Debug, Clone, Default)]
pub struct UrlVars {
    vars: Vec<(String, String)>,
}

impl UrlVars {
    pub fn new() -> Self {
        Self { vars: Vec::new() }
    }

    /// Set (or replace) a variable. A `None` value removes it.
    pub fn set(&mut self, name: impl Into<String>, value: Option<impl Into<String>>) {
        let name = name.into();
        match value {
            None => self.vars.retain(|(n, _)| n != &name),
            Some(value) => {
                let value = value.into();
                if let Some(entry) = self.vars.iter_mut().find(|(n, _)| n == &name) {
                    entry.1 = value;
                } else {
                    self.vars.push((name, value));
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }
}

/// Substitute every recognized `$name` or `${name}` occurrence in `url`
/// using `vars`. Unresolved `$` sequences are left verbatim. Pure function:
/// does not consult the filesystem or network.
pub fn substitute(url: &str, vars: &UrlVars) -> String {
    if vars.is_empty() {
        return url.to_string();
    }

    let mut result = String::with_capacity(url.len());
    let chars: Vec<char> = url.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        if chars[i] != '$' {
            result.push(chars[i]);
            i += 1;
            continue;
        }

        // Braced form: ${name}
        if chars.get(i + 1) == Some(&'{') {
            if let Some(close) = chars[i + 2..].iter().position(|&c| c == '}') {
                let name: String = chars[i + 2..i + 2 + close].iter().collect();
                if let Some((_, value)) = vars.vars.iter().find(|(n, _)| n == &name) {
                    result.push_str(value);
                    i = i + 2 + close + 1;
                    continue;
                }
            }
        }

        // Bare form: $name — longest-matching variable name wins.
        let rest: String = chars[i + 1..].iter().collect();
        let best_match = vars
            .vars
            .iter()
            .filter(|(n, _)| rest.starts_with(n.as_str()))
            .max_by_key(|(n, _)| n.len());

        if let Some((name, value)) = best_match {
            result.push_str(value);
            i += 1 + name.chars().count();
            continue;
        }

        // Unresolved `$`: left verbatim.
        result.push('$');
        i += 1;
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_on_empty_map() {
        let vars = UrlVars::new();
        let url = "http://example/$repo/$arch/repodata";
        assert_eq!(substitute(url, &vars), url);
    }

    #[test]
    fn test_bare_var_substitution() {
        let mut vars = UrlVars::new();
        vars.set("repo", Some("updates"));
        vars.set("arch", Some("x86_64"));
        assert_eq!(
            substitute("http://example/$repo/$arch/repodata", &vars),
            "http://example/updates/x86_64/repodata"
        );
    }

    #[test]
    fn test_braced_var_substitution() {
        let mut vars = UrlVars::new();
        vars.set("repo", Some("updates"));
        assert_eq!(
            substitute("http://example/${repo}extra/repodata", &vars),
            "http://example/updatesextra/repodata"
        );
    }

    #[test]
    fn test_unresolved_dollar_left_verbatim() {
        let vars = UrlVars::new();
        assert_eq!(substitute("price: $5", &vars), "price: $5");
    }

    #[test]
    fn test_longest_prefix_wins() {
        let mut vars = UrlVars::new();
        vars.set("arch", Some("generic"));
        vars.set("archsuffix", Some("specific"));
        assert_eq!(substitute("$archsuffix", &vars), "specific");
    }

    #[test]
    fn test_idempotent_when_values_have_no_dollar() {
        let mut vars = UrlVars::new();
        vars.set("repo", Some("updates"));
        let once = substitute("$repo/path", &vars);
        let twice = substitute(&once, &vars);
        assert_eq!(once, twice);
    }
}
