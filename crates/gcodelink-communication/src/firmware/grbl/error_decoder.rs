//! GRBL error and alarm code decoder
//! Converts numeric error and alarm codes to human-readable messages

const ERRORS: &[(u32, &str)] = &[
    (1, "Expected command letter. G-code words consist of a letter and a value."),
    (2, "Bad number format. Missing an expected value or invalid number."),
    (3, "Invalid statement. '$' system command was not recognized or supported."),
    (4, "Value < 0. Negative value received for an expected positive value."),
    (5, "Setting disabled. Homing cycle is not enabled via settings."),
    (6, "Value < 3 usec. Minimum step pulse time must be greater than 3usec."),
    (7, "EEPROM read fail. Using defaults."),
    (8, "Not idle. '$' command cannot be used unless the machine is idle."),
    (9, "G-code lock. G-code is locked out during alarm or jog state."),
    (10, "Homing not enabled. Soft limits cannot be enabled without homing."),
    (11, "Line overflow. Max characters per line exceeded."),
    (12, "Step rate > 30kHz. Setting value exceeds the maximum step rate."),
    (13, "Check door. Safety door detected as opened."),
    (14, "Line length exceeded. Build info or startup line too long for EEPROM."),
    (15, "Travel exceeded. Jog target exceeds machine travel."),
    (16, "Invalid jog command. Missing '=' or prohibited g-code."),
    (17, "Setting disabled. Laser mode requires PWM output."),
    (20, "Unsupported command. Unsupported or invalid g-code in block."),
    (21, "Modal group violation. More than one command from the same modal group."),
    (22, "Undefined feed rate. Feed rate has not yet been set."),
    (23, "Invalid gcode ID:23. Command requires an integer value."),
    (24, "Invalid gcode ID:24. Two commands require XYZ axis words."),
    (25, "Invalid gcode ID:25. Repeated g-code word in block."),
    (26, "Invalid gcode ID:26. Command requires XYZ axis words, none found."),
    (27, "Invalid gcode ID:27. N line number out of range."),
    (28, "Invalid gcode ID:28. Missing required P or L value word."),
    (29, "Invalid gcode ID:29. Unsupported work coordinate system."),
    (30, "Invalid gcode ID:30. G53 requires G0 or G1 motion mode."),
    (31, "Invalid gcode ID:31. Unused axis words with G80 active."),
    (32, "Invalid gcode ID:32. Arc has no axis words in the selected plane."),
    (33, "Invalid gcode ID:33. Motion target is invalid."),
    (34, "Invalid gcode ID:34. Arc radius definition error."),
    (35, "Invalid gcode ID:35. Arc offset missing IJK word in the selected plane."),
    (36, "Invalid gcode ID:36. Unused leftover words in block."),
    (37, "Invalid gcode ID:37. G43.1 offset applied to a non-tool-length axis."),
    (38, "Invalid gcode ID:38. Tool number greater than max supported value."),
];

const ALARMS: &[(u32, &str)] = &[
    (1, "Hard limit triggered. Position is likely lost; re-homing is recommended."),
    (2, "Soft limit. Motion target exceeds machine travel; position retained."),
    (3, "Reset while in motion. Position may be lost; re-homing is recommended."),
    (4, "Probe fail. Probe not in the expected initial state."),
    (5, "Probe fail. Probe did not contact the workpiece within travel."),
    (6, "Homing fail. Reset during active homing cycle."),
    (7, "Homing fail. Safety door opened during homing."),
    (8, "Homing fail. Could not clear limit switch on pull-off."),
    (9, "Homing fail. Could not find limit switch within search distance."),
];

fn lookup(table: &[(u32, &'static str)], code: u32) -> Option<&'static str> {
    table
        .iter()
        .find(|(entry, _)| *entry == code)
        .map(|(_, text)| *text)
}

/// Decode a GRBL error code to a human-readable message
pub fn decode_error(code: u32) -> String {
    lookup(ERRORS, code)
        .map(str::to_string)
        .unwrap_or_else(|| format!("Unknown error code: {}", code))
}

/// Decode a GRBL alarm code to a human-readable message
pub fn decode_alarm(code: u32) -> String {
    lookup(ALARMS, code)
        .map(str::to_string)
        .unwrap_or_else(|| format!("Unknown alarm code: {}", code))
}

/// Format error message with code and description
pub fn format_error(code: u32) -> String {
    format!("error:{} - {}", code, decode_error(code))
}

/// Format alarm message with code and description
pub fn format_alarm(code: u32) -> String {
    format!("ALARM:{} - {}", code, decode_alarm(code))
}
