// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Output-selection parameters for the monitor front-ends.
//!
//! The front-end applications read a small `key=value` configuration file to
//! decide which outputs to drive (console, LCD, 7-segment, MIDI, Art-Net).
//! Getting the file's bytes into memory is the platform's problem; this
//! crate only parses lines.
//!
//! The format is deliberately forgiving: one `key=value` pair per line,
//! unrecognized lines ignored, values other than `0`/`1` ignored. The
//! console and LCD outputs default on and can only be switched off; the
//! remaining outputs default off and can only be switched on. Repeated or
//! contradictory lines therefore converge to the most permissive reading of
//! the file, which is what the shipped front-ends have always done.

#![cfg_attr(not(test), no_std)]

const KEY_CONSOLE: &str = "console_output";
const KEY_LCD: &str = "lcd_output";
const KEY_7SEGMENT: &str = "7segment_output";
const KEY_MIDI: &str = "midi_output";
const KEY_ARTNET: &str = "artnet_output";

/// Which outputs the front-end should drive.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct OutputParams {
    pub console: bool,
    pub lcd: bool,
    pub seven_segment: bool,
    pub midi: bool,
    pub artnet: bool,
}

impl Default for OutputParams {
    fn default() -> Self {
        Self {
            console: true,
            lcd: true,
            seven_segment: false,
            midi: false,
            artnet: false,
        }
    }
}

impl OutputParams {
    /// Parses a whole configuration file from memory. Lines may end in LF or
    /// CRLF. Anything that isn't a recognized `key=value` pair is skipped.
    pub fn from_text(text: &str) -> Self {
        let mut params = Self::default();
        for line in text.lines() {
            params.apply_line(line);
        }
        params
    }

    /// Applies one configuration line.
    pub fn apply_line(&mut self, line: &str) {
        let Some((key, value)) = split_pair(line) else {
            return;
        };
        let Some(on) = parse_switch(value) else {
            return;
        };
        match key {
            // Default-on outputs honor only "0".
            KEY_CONSOLE if !on => self.console = false,
            KEY_LCD if !on => self.lcd = false,
            // Default-off outputs honor only "1".
            KEY_7SEGMENT if on => self.seven_segment = true,
            KEY_MIDI if on => self.midi = true,
            KEY_ARTNET if on => self.artnet = true,
            _ => (),
        }
    }
}

fn split_pair(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.split_once('=')?;
    Some((key.trim(), value.trim()))
}

fn parse_switch(value: &str) -> Option<bool> {
    match value {
        "0" => Some(false),
        "1" => Some(true),
        _ => None,
    }
}
