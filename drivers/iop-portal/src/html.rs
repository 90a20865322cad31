//! Static fragments of the provisioning page. The page is streamed as
//! start + wifi section + iop section + end; which section variant goes
//! in depends on whether the station is connected and whether an auth
//! token exists, giving the four banner combinations.

pub const PAGE_START: &str = "<!DOCTYPE HTML>\r\n\
    <html><body>\r\n\
    <h1><center>Hello, I'm your plantomator</center></h1>\r\n\
    <h4><center>If, in the future, you want to reset the configurations set \
    here, just press the factory reset button for at least 15 \
    seconds</center></h4>\
    <form style='margin: 0 auto; width: 500px;' action='/submit' method='POST'>\r\n";

pub const WIFI_HTML: &str = "<h3><center>Please provide your Wifi credentials, so we can connect to \
    it.</center></h3>\r\n\
    <div><div><strong>Network name:</strong></div>\
    <input name='ssid' type='text' style='width:100%' /></div>\r\n\
    <div><div><strong>Password:</strong></div>\
    <input name='password' type='password' style='width:100%' /></div>\r\n";

pub const WIFI_OVERWRITE_HTML: &str = "<h3><center>It seems you already have your wifi credentials set, if you \
    want to rewrite it, please fill the fields below. Otherwise they will be \
    ignored</center></h3>\r\n\
    <div><div><strong>Network name:</strong></div>\
    <input name='ssid' type='text' style='width:100%' /></div>\r\n\
    <div><div><strong>Password:</strong></div>\
    <input name='password' type='password' style='width:100%' /></div>\r\n";

pub const IOP_HTML: &str = "<h3><center>Please provide your Iop credentials, so we can get an \
    authentication token to use</center></h3>\r\n\
    <div><div><strong>Email:</strong></div>\
    <input name='iopEmail' type='text' style='width:100%' /></div>\r\n\
    <div><div><strong>Password:</strong></div>\
    <input name='iopPassword' type='password' style='width:100%' /></div>\r\n";

pub const IOP_OVERWRITE_HTML: &str = "<h3><center>It seems you already have your Iop credentials set, if you \
    want to rewrite it, please fill the fields below. Otherwise they will be \
    ignored</center></h3>\r\n\
    <div><div><strong>Email:</strong></div>\
    <input name='iopEmail' type='text' style='width:100%' /></div>\r\n\
    <div><div><strong>Password:</strong></div>\
    <input name='iopPassword' type='password' style='width:100%' /></div>\r\n";

pub const PAGE_END: &str = "<br>\r\n\
    <input type='submit' value='Submit' />\r\n\
    </form></body></html>";
