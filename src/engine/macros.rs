// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/// Build a map of resource name to value.
macro_rules! quota_map {
    ( $( $name:expr => $value:expr ),* $(,)? ) => {
        std::collections::BTreeMap::<String, i64>::from([
            $( ($name.to_string(), $value) ),*
        ])
    };
}
